//! The cooperative parallel download engine.

pub mod download;
pub mod target;

pub use download::{DownloadEngine, EngineConfig};
pub use target::{Target, TransferStatus};
