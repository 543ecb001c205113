//! The canonical fetch result (spec §3 `Result`, §4.6).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::metadata::repomd::RecordInfo;

/// The outcome of a `MetadataFetch` run (spec §3 `Result`).
///
/// The internal form is nested (`records`/`paths` keyed by record type);
/// `yum_repo` and `rpmmd_repo` below are projections over it, not separate
/// stored structures (spec §4.6).
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub destdir: PathBuf,
    pub base_url_used: String,
    pub mirrorlist_path: Option<PathBuf>,
    pub metalink_path: Option<PathBuf>,
    pub signature_path: Option<PathBuf>,
    pub manifest_path: PathBuf,
    pub records: HashMap<String, RecordInfo>,
    pub paths: HashMap<String, PathBuf>,
    pub revision: Option<String>,
    pub repo_tags: Vec<String>,
    pub content_tags: Vec<String>,
    pub distro_tags: Vec<(Option<String>, String)>,
    pub highest_timestamp: Option<i64>,
}

impl FetchResult {
    #[must_use]
    pub fn record(&self, record_type: &str) -> Option<&RecordInfo> {
        self.records.get(record_type)
    }

    #[must_use]
    pub fn path(&self, record_type: &str) -> Option<&Path> {
        self.paths.get(record_type).map(PathBuf::as_path)
    }

    /// The flat `yum_repo`-style view: one well-known field per record type
    /// that the original yum client looked up by name, plus a generic
    /// fallback map for anything else (spec §4.6 "flat is a projection").
    #[must_use]
    pub fn yum_repo(&self) -> YumRepo {
        YumRepo {
            primary: self.path("primary").map(Path::to_path_buf),
            filelists: self.path("filelists").map(Path::to_path_buf),
            other: self.path("other").map(Path::to_path_buf),
            primary_db: self.path("primary_db").map(Path::to_path_buf),
            updateinfo: self.path("updateinfo").map(Path::to_path_buf),
            group: self.path("group").map(Path::to_path_buf),
            group_gz: self.path("group_gz").map(Path::to_path_buf),
            prestodelta: self.path("prestodelta").map(Path::to_path_buf),
            deltainfo: self.path("deltainfo").map(Path::to_path_buf),
            repomd: self.manifest_path.clone(),
            extra: self
                .paths
                .iter()
                .filter(|(k, _)| !KNOWN_YUM_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// The nested `rpmmd_repo`-style view: every record keyed by type,
    /// local path alongside its manifest metadata (spec §4.6).
    #[must_use]
    pub fn rpmmd_repo(&self) -> HashMap<String, RpmmdRecord> {
        self.records
            .iter()
            .map(|(record_type, info)| {
                let local_path = self.paths.get(record_type).cloned();
                (
                    record_type.clone(),
                    RpmmdRecord {
                        info: info.clone(),
                        local_path,
                    },
                )
            })
            .collect()
    }
}

const KNOWN_YUM_FIELDS: &[&str] = &[
    "primary",
    "filelists",
    "other",
    "primary_db",
    "updateinfo",
    "group",
    "group_gz",
    "prestodelta",
    "deltainfo",
];

/// Flat view over [`FetchResult`] (spec §4.6, historically `yum_repo`).
#[derive(Debug, Clone, Default, Serialize)]
pub struct YumRepo {
    pub primary: Option<PathBuf>,
    pub filelists: Option<PathBuf>,
    pub other: Option<PathBuf>,
    pub primary_db: Option<PathBuf>,
    pub updateinfo: Option<PathBuf>,
    pub group: Option<PathBuf>,
    pub group_gz: Option<PathBuf>,
    pub prestodelta: Option<PathBuf>,
    pub deltainfo: Option<PathBuf>,
    pub repomd: PathBuf,
    pub extra: HashMap<String, PathBuf>,
}

/// Nested view entry over [`FetchResult`] (spec §4.6, historically
/// `rpmmd_repo`).
#[derive(Debug, Clone, Serialize)]
pub struct RpmmdRecord {
    pub info: RecordInfo,
    pub local_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> FetchResult {
        let mut records = HashMap::new();
        records.insert(
            "primary".to_string(),
            RecordInfo {
                record_type: "primary".to_string(),
                href: "repodata/abc-primary.xml.gz".to_string(),
                checksum: "deadbeef".to_string(),
                checksum_type: "sha256".to_string(),
                open_checksum: None,
                open_checksum_type: None,
                size: Some(10),
                open_size: None,
                timestamp: Some(100),
                db_version: None,
            },
        );
        let mut paths = HashMap::new();
        paths.insert(
            "primary".to_string(),
            PathBuf::from("/tmp/repo/repodata/abc-primary.xml.gz"),
        );
        FetchResult {
            destdir: PathBuf::from("/tmp/repo"),
            base_url_used: "http://example/repo".to_string(),
            mirrorlist_path: None,
            metalink_path: None,
            signature_path: None,
            manifest_path: PathBuf::from("/tmp/repo/repodata/repomd.xml"),
            records,
            paths,
            revision: Some("100".to_string()),
            repo_tags: vec![],
            content_tags: vec![],
            distro_tags: vec![],
            highest_timestamp: Some(100),
        }
    }

    #[test]
    fn yum_repo_exposes_known_fields() {
        let result = sample_result();
        let flat = result.yum_repo();
        assert_eq!(
            flat.primary,
            Some(PathBuf::from("/tmp/repo/repodata/abc-primary.xml.gz"))
        );
        assert!(flat.filelists.is_none());
        assert!(flat.extra.is_empty());
    }

    #[test]
    fn rpmmd_repo_keeps_metadata_alongside_local_path() {
        let result = sample_result();
        let nested = result.rpmmd_repo();
        let primary = &nested["primary"];
        assert_eq!(primary.info.checksum, "deadbeef");
        assert_eq!(
            primary.local_path,
            Some(PathBuf::from("/tmp/repo/repodata/abc-primary.xml.gz"))
        );
    }
}
