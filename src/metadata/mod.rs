//! `repomd.xml` parsing and the two-phase metadata fetch (spec §4.5, §4.6).

pub mod fetch;
pub mod repomd;
pub mod result;

pub use fetch::MetadataFetch;
pub use repomd::{RecordInfo, Repomd};
pub use result::{FetchResult, RpmmdRecord, YumRepo};
