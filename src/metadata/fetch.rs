//! `MetadataFetch` (spec §4.5): the two-phase `repomd.xml` + records fetch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use reqwest::Client;
use tracing::{debug, instrument, warn};

use crate::config::{HandleConfig, resolve_alias};
use crate::core::error::{Error, Result};
use crate::engine::download::{DownloadEngine, EngineConfig};
use crate::engine::target::{Target, TransferStatus};
use crate::metadata::repomd::{self, RecordInfo};
use crate::metadata::result::FetchResult;
use crate::mirror::types::MirrorList;
use crate::verify::digest::ChecksumType;

/// Resolve `allow_list` / `deny_list` / `substitution_map` against the
/// manifest's available record types (spec §4.5 Phase 2).
///
/// The `nil` element in an allow list only marks "the manifest itself is
/// wanted" — Phase 1 always fetches the manifest regardless, so its only
/// observable effect here is that `[nil]` alone selects zero records.
fn select_record_types(
    available: &[String],
    allow_list: Option<&[Option<String>]>,
    deny_list: &[String],
    record_substitution: &[(String, String)],
) -> Vec<String> {
    let mut selected: Vec<String> = match allow_list {
        None => available.to_vec(),
        Some(list) => {
            let requested: Vec<String> = list
                .iter()
                .filter_map(|entry| entry.as_deref())
                .map(|name| resolve_alias(name, record_substitution).to_string())
                .collect();
            available
                .iter()
                .filter(|t| requested.contains(t))
                .cloned()
                .collect()
        }
    };
    selected.retain(|t| !deny_list.contains(t));
    selected
}

fn dest_path(destdir: &Path, href: &str) -> PathBuf {
    destdir.join(href)
}

/// Drives the two-phase `repomd.xml` + selected-records fetch against an
/// already-resolved [`MirrorList`] (spec §4.5).
pub struct MetadataFetch<'a> {
    config: &'a HandleConfig,
    client: Client,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a> MetadataFetch<'a> {
    #[must_use]
    pub fn new(config: &'a HandleConfig, client: Client) -> Self {
        Self {
            config,
            client,
            interrupt: None,
        }
    }

    /// Attach the Handle's shared interrupt flag (spec §6.1 `interruptible`)
    /// so an external signal aborts in-flight downloads, not just future ones.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Option<Arc<AtomicBool>>) -> Self {
        self.interrupt = interrupt;
        self
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_parallel_downloads: self.config.max_parallel_downloads,
            max_downloads_per_mirror: self.config.max_downloads_per_mirror,
            max_mirror_tries: self.config.max_mirror_tries,
            allowed_mirror_failures: self.config.allowed_mirror_failures,
            adaptive_mirror_sorting: self.config.adaptive_mirror_sorting,
            checksum_enabled: self.config.checksum_enabled,
            low_speed_limit: self.config.low_speed_limit,
            low_speed_time: self.config.low_speed_time,
            // Phase 2 needs per-target results, not a single short-circuiting
            // Err: `ignore_missing` records (e.g. `prestodelta`) must be able
            // to fail individually while the rest of the batch completes.
            fail_fast: false,
            userpwd: self.config.userpwd.clone(),
            http_auth: self.config.http_auth,
            http_auth_methods: self.config.http_auth_methods,
            max_speed: self.config.max_speed,
            preserve_time: self.config.preserve_time,
            interrupt: self.interrupt.clone(),
        }
    }

    fn destdir(&self) -> Result<PathBuf> {
        self.config
            .destdir
            .clone()
            .ok_or_else(|| Error::BadFuncArg("destdir is required for a remote fetch".to_string()))
    }

    /// Run the full fetch. Returns the assembled [`FetchResult`] plus the
    /// mirror list as resorted/retired by the engine (spec §5 "mirror-list
    /// mutations become visible between cycles").
    #[instrument(skip(self, mirrors, previous))]
    pub async fn run(
        &self,
        mirrors: MirrorList,
        previous: Option<&FetchResult>,
    ) -> Result<(FetchResult, MirrorList)> {
        if self.config.local_only {
            return Ok((self.run_local(previous)?, mirrors));
        }

        let destdir = self.destdir()?;
        let manifest_path = destdir.join("repodata/repomd.xml");

        let skip_manifest = self.config.update && is_usable(&manifest_path);

        let (base_url_used, signature_path, mut mirrors) = if skip_manifest {
            (
                previous
                    .map(|p| p.base_url_used.clone())
                    .unwrap_or_default(),
                previous.and_then(|p| p.signature_path.clone()),
                mirrors,
            )
        } else {
            self.fetch_manifest(mirrors, &manifest_path).await?
        };

        let content = tokio::fs::read_to_string(&manifest_path)
            .await
            .map_err(Error::Io)?;
        let parsed = repomd::parse(&content)?;

        let mut records: HashMap<String, RecordInfo> = parsed
            .records
            .into_iter()
            .map(|r| (r.record_type.clone(), r))
            .collect();
        let mut paths: HashMap<String, PathBuf> = HashMap::new();

        if let Some(prev) = previous {
            records.extend(prev.records.clone());
            paths.extend(prev.paths.clone());
        }

        let available: Vec<String> = records.keys().cloned().collect();
        let mut wanted = select_record_types(
            &available,
            self.config.allow_list.as_deref(),
            &self.config.deny_list,
            &self.config.record_substitution,
        );
        if self.config.update {
            if let Some(prev) = previous {
                wanted.retain(|t| !prev.records.contains_key(t));
            }
        }

        let targets: Vec<Target> = wanted
            .iter()
            .filter_map(|record_type| records.get(record_type).map(|info| (record_type, info)))
            .map(|(record_type, info)| {
                let href_basename = Path::new(&info.href)
                    .file_name()
                    .map_or_else(|| info.href.clone(), |n| n.to_string_lossy().to_string());
                let mut target = Target::new(
                    info.href.clone(),
                    destdir.join("repodata").join(&href_basename),
                )
                .ignore_missing(self.config.ignore_missing);
                if let Some(size) = info.size {
                    target = target.with_size(size);
                }
                if let Ok(checksum_type) = ChecksumType::parse(&info.checksum_type) {
                    target = target.with_checksum(checksum_type, info.checksum.clone());
                }
                if let Some(handle_cb) = self.config.handle_mirror_failure_cb.clone() {
                    let record_name = record_type.clone();
                    target = target.on_mirror_failure(std::sync::Arc::new(move |msg, url| {
                        handle_cb(msg, url, &record_name)
                    }));
                }
                target
            })
            .collect();

        if !targets.is_empty() {
            let engine = DownloadEngine::new(self.client.clone(), mirrors, self.engine_config());
            let results = engine.run(targets).await?;
            mirrors = engine.into_mirrors().await;
            for (target, status) in results {
                match status {
                    TransferStatus::Successful { path, .. } | TransferStatus::AlreadyExists { path } => {
                        let record_type = wanted
                            .iter()
                            .find(|t| {
                                records
                                    .get(*t)
                                    .is_some_and(|r| r.href == target.relative_path)
                            })
                            .cloned();
                        if let Some(record_type) = record_type {
                            paths.insert(record_type, path);
                        }
                    }
                    TransferStatus::Skipped { reason } => {
                        debug!(target = %target.relative_path, reason, "record skipped");
                    }
                    TransferStatus::Error { error } => {
                        if !target.ignore_missing {
                            return Err(Error::IncompleteResult(format!(
                                "{}: {error}",
                                target.relative_path
                            )));
                        }
                        warn!(target = %target.relative_path, error, "ignoring missing record");
                    }
                }
            }
        }

        let highest_timestamp = records.values().filter_map(|r| r.timestamp).max();

        Ok((
            FetchResult {
                destdir,
                base_url_used,
                mirrorlist_path: previous.and_then(|p| p.mirrorlist_path.clone()),
                metalink_path: previous.and_then(|p| p.metalink_path.clone()),
                signature_path,
                manifest_path,
                records,
                paths,
                revision: parsed.revision,
                repo_tags: parsed.repo_tags,
                content_tags: parsed.content_tags,
                distro_tags: parsed.distro_tags,
                highest_timestamp,
            },
            mirrors,
        ))
    }

    /// Phase 1 (spec §4.5): download `repomd.xml` (and, when `gpg_check`,
    /// its detached signature) and verify it.
    async fn fetch_manifest(
        &self,
        mirrors: MirrorList,
        manifest_path: &Path,
    ) -> Result<(String, Option<PathBuf>, MirrorList)> {
        let sig_path = manifest_path.with_extension("xml.asc");
        let with_failure_cb = |target: Target, record_name: &'static str| -> Target {
            match self.config.handle_mirror_failure_cb.clone() {
                Some(handle_cb) => target.on_mirror_failure(std::sync::Arc::new(move |msg, url| {
                    handle_cb(msg, url, record_name)
                })),
                None => target,
            }
        };
        let mut targets = vec![with_failure_cb(
            Target::new("repodata/repomd.xml", manifest_path),
            "repomd",
        )];
        if self.config.gpg_check {
            targets.push(with_failure_cb(
                Target::new("repodata/repomd.xml.asc", &sig_path).ignore_missing(false),
                "repomd.xml.asc",
            ));
        }

        let engine = DownloadEngine::new(self.client.clone(), mirrors, self.engine_config());
        let results = engine.run(targets).await?;
        let mirrors = engine.into_mirrors().await;

        let mut base_url_used = String::new();
        let mut got_signature = false;
        for (target, status) in results {
            match status {
                TransferStatus::Successful { mirror_used, .. } => {
                    if target.relative_path == "repodata/repomd.xml" {
                        base_url_used = mirror_used;
                    } else {
                        got_signature = true;
                    }
                }
                TransferStatus::AlreadyExists { .. } => {
                    if target.relative_path != "repodata/repomd.xml" {
                        got_signature = true;
                    }
                }
                TransferStatus::Skipped { .. } => {}
                TransferStatus::Error { error } => {
                    return Err(Error::IncompleteResult(format!(
                        "{}: {error}",
                        target.relative_path
                    )));
                }
            }
        }

        if self.config.gpg_check {
            if !got_signature {
                return Err(Error::BadGpg("repomd.xml.asc was not retrieved".to_string()));
            }
            self.verify_signature(manifest_path, &sig_path)?;
            return Ok((base_url_used, Some(sig_path), mirrors));
        }

        Ok((base_url_used, None, mirrors))
    }

    #[cfg(feature = "gpg")]
    fn verify_signature(&self, manifest_path: &Path, sig_path: &Path) -> Result<()> {
        let verifier = match &self.config.gnupghomedir {
            Some(dir) => crate::verify::gpg::PgpVerifier::load(dir)?,
            None => crate::verify::gpg::PgpVerifier::empty(),
        };
        verifier.verify_files(manifest_path, sig_path)
    }

    #[cfg(not(feature = "gpg"))]
    #[allow(clippy::unused_self)]
    fn verify_signature(&self, _manifest_path: &Path, _sig_path: &Path) -> Result<()> {
        Err(Error::GpgNotSupported)
    }

    /// Local mode (spec §4.5): no transfers, just read and validate
    /// whatever is already on disk.
    fn run_local(&self, previous: Option<&FetchResult>) -> Result<FetchResult> {
        let destdir = match &self.config.destdir {
            Some(dir) => dir.clone(),
            None => {
                let base = self
                    .config
                    .base_urls
                    .first()
                    .ok_or_else(|| Error::BadFuncArg("local_only requires destdir or base_urls[0]".to_string()))?;
                PathBuf::from(base.strip_prefix("file://").unwrap_or(base))
            }
        };
        let manifest_path = destdir.join("repodata/repomd.xml");
        if !manifest_path.exists() {
            return Err(Error::NotLocal(manifest_path.display().to_string()));
        }
        let content = std::fs::read_to_string(&manifest_path).map_err(Error::Io)?;
        let parsed = repomd::parse(&content)?;

        let mut records: HashMap<String, RecordInfo> = parsed
            .records
            .into_iter()
            .map(|r| (r.record_type.clone(), r))
            .collect();
        if let Some(prev) = previous {
            records.extend(prev.records.clone());
        }

        let available: Vec<String> = records.keys().cloned().collect();
        let wanted = select_record_types(
            &available,
            self.config.allow_list.as_deref(),
            &self.config.deny_list,
            &self.config.record_substitution,
        );

        let mut paths = HashMap::new();
        let mut missing = Vec::new();
        for record_type in &wanted {
            let Some(info) = records.get(record_type) else {
                continue;
            };
            let href_basename = Path::new(&info.href)
                .file_name()
                .map_or_else(|| info.href.clone(), |n| n.to_string_lossy().to_string());
            let path = dest_path(&destdir.join("repodata"), &href_basename);
            if !path.exists() {
                missing.push(record_type.clone());
                continue;
            }
            if self.config.checksum_enabled {
                if let Ok(checksum_type) = ChecksumType::parse(&info.checksum_type) {
                    if crate::verify::digest::verify_file(&path, checksum_type, &info.checksum)
                        .is_err()
                    {
                        missing.push(record_type.clone());
                        continue;
                    }
                }
            }
            paths.insert(record_type.clone(), path);
        }

        if !missing.is_empty() && !self.config.ignore_missing {
            return Err(Error::IncompleteRepo(format!(
                "missing or invalid local records: {}",
                missing.join(", ")
            )));
        }

        let highest_timestamp = records.values().filter_map(|r| r.timestamp).max();
        let base_url_used = self
            .config
            .base_urls
            .first()
            .cloned()
            .unwrap_or_else(|| destdir.display().to_string());

        Ok(FetchResult {
            destdir,
            base_url_used,
            mirrorlist_path: None,
            metalink_path: None,
            signature_path: None,
            manifest_path,
            records,
            paths,
            revision: parsed.revision,
            repo_tags: parsed.repo_tags,
            content_tags: parsed.content_tags,
            distro_tags: parsed.distro_tags,
            highest_timestamp,
        })
    }
}

fn is_usable(path: &Path) -> bool {
    path.exists() && std::fs::metadata(path).is_ok_and(|m| m.len() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_filters_and_resolves_aliases() {
        let available = vec![
            "primary".to_string(),
            "filelists".to_string(),
            "other".to_string(),
        ];
        let allow = vec![Some("fl".to_string())];
        let subs = vec![("fl".to_string(), "filelists".to_string())];
        let selected = select_record_types(&available, Some(&allow), &[], &subs);
        assert_eq!(selected, vec!["filelists".to_string()]);
    }

    #[test]
    fn allow_list_of_only_nil_selects_nothing() {
        let available = vec!["primary".to_string()];
        let allow = vec![None];
        let selected = select_record_types(&available, Some(&allow), &[], &[]);
        assert!(selected.is_empty());
    }

    #[test]
    fn deny_list_removes_from_whatever_remains() {
        let available = vec!["primary".to_string(), "filelists".to_string()];
        let selected = select_record_types(&available, None, &["filelists".to_string()], &[]);
        assert_eq!(selected, vec!["primary".to_string()]);
    }

    #[test]
    fn no_allow_list_keeps_everything_available() {
        let available = vec!["primary".to_string(), "other".to_string()];
        let selected = select_record_types(&available, None, &[], &[]);
        assert_eq!(selected, available);
    }
}
