use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use common::{EngineCommand, EngineState, ExecutionEvent};

use crate::feed::BarFeed;

/// Cloneable handle passed to other crates (API, binary).
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }
}

/// The main engine: owns the bar feeds and processes lifecycle commands.
///
/// Traders are spawned separately and only read the shared state, so a
/// pause suppresses new decisions while bars, stops and fills keep flowing.
pub struct Engine {
    feeds: Vec<BarFeed>,
    state: Arc<RwLock<EngineState>>,
    command_rx: mpsc::Receiver<EngineCommand>,
    #[allow(dead_code)] // kept to prevent channel close
    command_tx: mpsc::Sender<EngineCommand>,
}

impl Engine {
    pub fn new() -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(EngineState::Stopped));

        let handle = EngineHandle {
            command_tx: command_tx.clone(),
            state: state.clone(),
        };

        let engine = Engine {
            feeds: Vec::new(),
            state,
            command_rx,
            command_tx,
        };

        (engine, handle)
    }

    /// State cell shared with every trader.
    pub fn shared_state(&self) -> Arc<RwLock<EngineState>> {
        self.state.clone()
    }

    /// Register a feed to be spawned on `Start`.
    pub fn add_feed(&mut self, feed: BarFeed) {
        self.feeds.push(feed);
    }

    /// Run the engine. This task drives feed spawning and command processing.
    /// Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(feeds = self.feeds.len(), "Engine initialized in Stopped state. Waiting for Start command.");

        let mut feed_handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        loop {
            match self.command_rx.recv().await {
                Some(EngineCommand::Start) => {
                    let current = *self.state.read().await;
                    match current {
                        EngineState::Running => {
                            info!("Engine already running");
                        }
                        EngineState::Paused => {
                            info!("Engine resumed by Start");
                            *self.state.write().await = EngineState::Running;
                        }
                        EngineState::Stopped => {
                            info!(feeds = self.feeds.len(), "Starting bar feeds");
                            *self.state.write().await = EngineState::Running;
                            for feed in &self.feeds {
                                feed_handles.push(tokio::spawn(feed.clone().run()));
                            }
                        }
                    }
                }

                Some(EngineCommand::Stop) => {
                    info!("Engine stopping — aborting feed tasks");
                    *self.state.write().await = EngineState::Stopped;
                    for h in feed_handles.drain(..) {
                        h.abort();
                    }
                }

                Some(EngineCommand::Pause) => {
                    let current = *self.state.read().await;
                    if current == EngineState::Running {
                        info!("Engine paused — feeds continue, new decisions suppressed");
                        *self.state.write().await = EngineState::Paused;
                    } else {
                        warn!(state = %current, "Pause received but engine is not running");
                    }
                }

                Some(EngineCommand::Resume) => {
                    let current = *self.state.read().await;
                    if current == EngineState::Paused {
                        info!("Engine resumed");
                        *self.state.write().await = EngineState::Running;
                    } else {
                        warn!(state = %current, "Resume received but engine is not paused");
                    }
                }

                None => {
                    warn!("Engine command channel closed — shutting down");
                    for h in feed_handles.drain(..) {
                        h.abort();
                    }
                    break;
                }
            }
        }
    }
}

/// Fan execution notifications out to the trader that owns the instrument.
///
/// Runs until the collaborator's event channel closes.
pub async fn route_execution_events(
    mut event_rx: mpsc::Receiver<ExecutionEvent>,
    routes: HashMap<String, mpsc::Sender<ExecutionEvent>>,
) {
    while let Some(event) = event_rx.recv().await {
        let instrument = event.instrument().to_string();
        match routes.get(&instrument) {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    warn!(instrument = %instrument, "Trader gone; execution event dropped");
                }
            }
            None => debug!(instrument = %instrument, "Execution event for unknown instrument"),
        }
    }
    info!("Execution event channel closed — router exiting");
}
