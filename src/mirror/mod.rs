//! Mirror discovery, ranking, and latency probing.

pub mod fastest;
pub mod metalink;
pub mod mirrorlist;
pub mod resolver;
pub mod types;

pub use fastest::FastestMirrorStage;
pub use metalink::{Metalink, MetalinkAlternate, MetalinkUrl};
pub use resolver::{ResolvedMirrors, SourceFetcher};
pub use types::{Mirror, MirrorList};
