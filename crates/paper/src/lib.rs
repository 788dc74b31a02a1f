pub mod client;
pub mod replay;

pub use client::{FillMode, PaperClient};
pub use replay::ReplaySource;
