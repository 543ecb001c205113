//! Download targets.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::CbResult;
use crate::verify::digest::ChecksumType;

/// `progresscb`/`endcb`/`mirrorfailurecb` scoped to one [`Target`].
pub type TargetProgressCb = Arc<dyn Fn(u64, u64) -> CbResult + Send + Sync>;
pub type TargetEndCb = Arc<dyn Fn(&TransferStatus) + Send + Sync>;
pub type TargetMirrorFailureCb = Arc<dyn Fn(&str, &str) -> CbResult + Send + Sync>;

/// A file to fetch relative to the resolved repository root, plus
/// everything needed to verify, place, and observe it once downloaded.
#[derive(Clone)]
pub struct Target {
    /// Path appended to a mirror's base URL, e.g. `repodata/repomd.xml` or
    /// `Packages/f/foo-1.0-1.x86_64.rpm`.
    pub relative_path: String,
    /// Destination path under the Handle's `destdir`.
    pub dest_path: PathBuf,
    pub expected_size: Option<u64>,
    pub checksum: Option<(ChecksumType, String)>,
    /// Skip this target without failing the whole fetch if every mirror
    /// 404s (used for optional repodata records).
    pub ignore_missing: bool,
    /// `[start, end]`; `end <= start` is ignored (full-file semantics).
    pub byte_range: Option<(u64, Option<u64>)>,
    pub resume: bool,
    pub progress_cb: Option<TargetProgressCb>,
    pub end_cb: Option<TargetEndCb>,
    pub mirror_failure_cb: Option<TargetMirrorFailureCb>,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("relative_path", &self.relative_path)
            .field("dest_path", &self.dest_path)
            .field("expected_size", &self.expected_size)
            .field("checksum", &self.checksum)
            .field("ignore_missing", &self.ignore_missing)
            .field("byte_range", &self.byte_range)
            .field("resume", &self.resume)
            .finish_non_exhaustive()
    }
}

impl Target {
    #[must_use]
    pub fn new(relative_path: impl Into<String>, dest_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
            dest_path: dest_path.into(),
            expected_size: None,
            checksum: None,
            ignore_missing: false,
            byte_range: None,
            resume: false,
            progress_cb: None,
            end_cb: None,
            mirror_failure_cb: None,
        }
    }

    #[must_use]
    pub fn with_checksum(mut self, checksum_type: ChecksumType, hex: impl Into<String>) -> Self {
        self.checksum = Some((checksum_type, hex.into()));
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    #[must_use]
    pub fn ignore_missing(mut self, val: bool) -> Self {
        self.ignore_missing = val;
        self
    }

    #[must_use]
    pub fn resumable(mut self, val: bool) -> Self {
        self.resume = val;
        self
    }

    #[must_use]
    pub fn byte_range(mut self, start: u64, end: Option<u64>) -> Self {
        self.byte_range = Some((start, end));
        self
    }

    #[must_use]
    pub fn on_progress(mut self, cb: TargetProgressCb) -> Self {
        self.progress_cb = Some(cb);
        self
    }

    #[must_use]
    pub fn on_end(mut self, cb: TargetEndCb) -> Self {
        self.end_cb = Some(cb);
        self
    }

    #[must_use]
    pub fn on_mirror_failure(mut self, cb: TargetMirrorFailureCb) -> Self {
        self.mirror_failure_cb = Some(cb);
        self
    }
}

/// The outcome of fetching a single [`Target`], passed to the `end`
/// callback as the terminal transfer status.
#[derive(Debug, Clone)]
pub enum TransferStatus {
    Successful {
        path: PathBuf,
        bytes: u64,
        resumed: bool,
        mirror_used: String,
    },
    AlreadyExists {
        path: PathBuf,
    },
    Skipped {
        reason: String,
    },
    Error {
        error: String,
    },
}

impl TransferStatus {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Successful { .. } | Self::AlreadyExists { .. })
    }
}
