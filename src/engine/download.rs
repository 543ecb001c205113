//! `DownloadEngine`: single cooperative loop multiplexing all in-flight
//! transfers via `futures::stream::buffer_unordered`, with a two-tier
//! (`max_parallel_downloads`, `max_downloads_per_mirror`) concurrency cap,
//! plus adaptive mirror re-ranking, retirement, and resume.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use reqwest::Client;
use reqwest::header::RANGE;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, instrument, warn};

use crate::core::error::{Error, Result};
use crate::engine::target::{Target, TransferStatus};
use crate::mirror::types::MirrorList;
use crate::verify::digest;

const RESUME_XATTR: &str = "user.Librepo.DownloadInProgress";
const CHUNK_FLUSH: usize = 8 * 1024;

/// The scheduling knobs from `HandleConfig` the engine needs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_parallel_downloads: usize,
    pub max_downloads_per_mirror: usize,
    pub max_mirror_tries: usize,
    pub allowed_mirror_failures: u32,
    pub adaptive_mirror_sorting: bool,
    pub checksum_enabled: bool,
    pub low_speed_limit: u64,
    pub low_speed_time: Duration,
    pub fail_fast: bool,
    /// Origin-server `Basic` credentials (spec §3 `userpwd` / `http_auth` —
    /// distinct from `ProxyConfig::userpwd`), applied per-request.
    pub userpwd: Option<String>,
    /// Gates whether `userpwd` is actually attached to requests (spec §6.1
    /// `http_auth`); only `Basic` is reachable through the underlying HTTP
    /// client, so `http_auth_methods` is consulted only to check that
    /// `Basic`/`Any` was requested.
    pub http_auth: bool,
    pub http_auth_methods: crate::config::AuthMethods,
    /// Caps per-target throughput in bytes/second by sleeping after each
    /// chunk (spec §6.1 `max_speed`); `None` disables throttling.
    pub max_speed: Option<u64>,
    /// Sets each completed file's mtime from the response's `Last-Modified`
    /// header (spec §6.1 `preserve_time`).
    pub preserve_time: bool,
    /// Shared flag an external caller can set to abort the whole batch
    /// (spec §6.1 `interruptible` / spec §4.4 "optional interrupt signal").
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_downloads: 3,
            max_downloads_per_mirror: 3,
            max_mirror_tries: 0,
            allowed_mirror_failures: 4,
            adaptive_mirror_sorting: true,
            checksum_enabled: true,
            low_speed_limit: 1000,
            low_speed_time: Duration::from_secs(30),
            fail_fast: false,
            userpwd: None,
            http_auth: false,
            http_auth_methods: crate::config::AuthMethods::ANY,
            max_speed: None,
            preserve_time: false,
            interrupt: None,
        }
    }
}

/// Drives a batch of [`Target`]s to completion against a shared
/// [`MirrorList`].
pub struct DownloadEngine {
    client: Client,
    mirrors: Mutex<MirrorList>,
    mirror_slots: Mutex<HashMap<String, Arc<Semaphore>>>,
    config: EngineConfig,
    cancelled: AtomicBool,
}

impl DownloadEngine {
    #[must_use]
    pub fn new(client: Client, mirrors: MirrorList, config: EngineConfig) -> Self {
        Self {
            client,
            mirrors: Mutex::new(mirrors),
            mirror_slots: Mutex::new(HashMap::new()),
            config,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Run every target to its terminal state. In `fail_fast=false` mode
    /// this always returns `Ok`, one
    /// entry per target, even if some targets failed — inspect each
    /// `TransferStatus`.
    #[instrument(skip(self, targets))]
    pub async fn run(&self, targets: Vec<Target>) -> Result<Vec<(Target, TransferStatus)>> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let concurrency = self.config.max_parallel_downloads.max(1);
        let results = stream::iter(targets)
            .map(|target| self.run_target(target))
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await;

        if self.config.fail_fast {
            if let Some((target, status)) = results
                .iter()
                .find(|(_, status)| matches!(status, TransferStatus::Error { .. }))
            {
                self.cancelled.store(true, Ordering::SeqCst);
                return Err(Error::IncompleteResult(format!(
                    "{}: {status:?}",
                    target.relative_path
                )));
            }
        }

        Ok(results)
    }

    /// Snapshot the mirror list as resorted/retired by this run (callers
    /// feed this back into the Handle for the next fetch).
    pub async fn into_mirrors(self) -> MirrorList {
        self.mirrors.into_inner()
    }

    async fn mirror_semaphore(&self, mirror_url: &str) -> Arc<Semaphore> {
        let mut slots = self.mirror_slots.lock().await;
        slots
            .entry(mirror_url.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_downloads_per_mirror.max(1))))
            .clone()
    }

    /// Selection order: not retired, not already tried for
    /// this target, otherwise current `MirrorList` order.
    async fn select_mirror(&self, tried: &HashSet<String>) -> Option<String> {
        let mirrors = self.mirrors.lock().await;
        mirrors
            .as_slice()
            .iter()
            .find(|m| !m.retired && !tried.contains(&m.url))
            .map(|m| m.url.clone())
    }

    async fn record_outcome(&self, mirror_url: &str, success: bool) {
        let mut mirrors = self.mirrors.lock().await;
        for m in mirrors.iter_mut() {
            if m.url == mirror_url {
                if success {
                    m.record_success();
                } else {
                    m.record_failure(self.config.allowed_mirror_failures);
                }
                break;
            }
        }
        if self.config.adaptive_mirror_sorting {
            mirrors.adaptive_resort();
        }
    }

    #[instrument(skip(self, target), fields(target = %target.relative_path))]
    async fn run_target(&self, target: Target) -> (Target, TransferStatus) {
        if let Some(status) = self.check_already_downloaded(&target).await {
            self.emit_end(&target, &status);
            return (target, status);
        }

        let mut tried = HashSet::new();
        let mut last_error: Option<Error> = None;

        loop {
            if self.cancelled.load(Ordering::SeqCst) || self.is_interrupted() {
                last_error = Some(Error::CbInterrupted);
                break;
            }
            if self.config.max_mirror_tries > 0 && tried.len() >= self.config.max_mirror_tries {
                break;
            }
            let Some(mirror_url) = self.select_mirror(&tried).await else {
                break;
            };
            tried.insert(mirror_url.clone());

            let semaphore = self.mirror_semaphore(&mirror_url).await;
            let Ok(_permit) = semaphore.acquire().await else {
                continue;
            };

            match self.attempt(&target, &mirror_url).await {
                Ok(status) => {
                    self.record_outcome(&mirror_url, true).await;
                    self.emit_end(&target, &status);
                    return (target, status);
                }
                Err(err) => {
                    debug!(mirror = %mirror_url, error = %err, "mirror attempt failed");
                    self.record_outcome(&mirror_url, false).await;
                    let cb_result = target
                        .mirror_failure_cb
                        .as_ref()
                        .map(|cb| cb(&err.to_string(), &mirror_url));
                    if matches!(cb_result, Some(crate::config::CbResult::Error)) {
                        self.cancelled.store(true, Ordering::SeqCst);
                    }
                    let recoverable = err.is_mirror_recoverable();
                    last_error = Some(err);
                    if !recoverable {
                        break;
                    }
                }
            }
        }

        let status = TransferStatus::Error {
            error: last_error.map_or_else(|| "no usable mirror".to_string(), |e| e.to_string()),
        };
        self.emit_end(&target, &status);
        (target, status)
    }

    /// Spec §4.4 resume shortcut: `resume=true`, no in-progress sentinel,
    /// file already present and matching digest → `AlreadyExists`, not a
    /// failure under fail_fast.
    async fn check_already_downloaded(&self, target: &Target) -> Option<TransferStatus> {
        if !target.resume {
            return None;
        }
        if !target.dest_path.exists() {
            return None;
        }
        if has_resume_sentinel(&target.dest_path) {
            return None;
        }
        let (checksum_type, expected) = target.checksum.as_ref()?;
        if !self.config.checksum_enabled {
            return None;
        }
        digest::verify_file(&target.dest_path, *checksum_type, expected)
            .ok()
            .map(|()| TransferStatus::AlreadyExists {
                path: target.dest_path.clone(),
            })
    }

    fn is_interrupted(&self) -> bool {
        self.config
            .interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn emit_end(&self, target: &Target, status: &TransferStatus) {
        if let Some(cb) = &target.end_cb {
            cb(status);
        }
    }

    #[instrument(skip(self, target), fields(mirror = %mirror_url))]
    async fn attempt(&self, target: &Target, mirror_url: &str) -> Result<TransferStatus> {
        let url = format!(
            "{}/{}",
            mirror_url.trim_end_matches('/'),
            target.relative_path
        );

        let mut resume_offset = 0u64;
        if target.resume && target.dest_path.exists() && has_resume_sentinel(&target.dest_path) {
            resume_offset = std::fs::metadata(&target.dest_path)?.len();
        }

        let mut request = self.client.get(&url);
        if self.config.http_auth
            && self.config.http_auth_methods.contains(crate::config::AuthMethods::BASIC)
        {
            if let Some(userpwd) = &self.config.userpwd {
                if let Some((user, pass)) = userpwd.split_once(':') {
                    request = request.basic_auth(user, Some(pass));
                }
            }
        }
        let range_header = match (target.byte_range, resume_offset) {
            (Some((start, end)), _) if end.is_none_or(|e| e > start) => {
                Some(format_range(start, end))
            }
            (None, offset) if offset > 0 => Some(format!("bytes={offset}-")),
            _ => None,
        };
        if let Some(range) = &range_header {
            request = request.header(RANGE, range.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        if range_header.is_some() && status.as_u16() != 206 && resume_offset > 0 {
            return Err(Error::TemporaryErr(format!(
                "server ignored Range request for {url} (resume unsupported)"
            )));
        }
        if !status.is_success() && status.as_u16() != 206 {
            return Err(Error::BadStatus {
                status: status.as_u16(),
                url,
            });
        }
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| httpdate::parse_http_date(v).ok());

        if let Some(parent) = target.dest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let append = resume_offset > 0;
        if target.resume {
            set_resume_sentinel(&target.dest_path)?;
        }
        let write_path = if append {
            target.dest_path.clone()
        } else {
            target.dest_path.with_extension("part")
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&write_path)
            .await?;

        let mut downloaded = resume_offset;
        let total = target
            .expected_size
            .or_else(|| response.content_length().map(|l| l + resume_offset));
        let mut response = response;
        let mut window_start = Instant::now();
        let mut window_bytes = 0u64;
        let mut pending = 0usize;
        let mut throttle_window_start = Instant::now();
        let mut throttle_window_bytes = 0u64;

        while let Some(chunk) = response.chunk().await? {
            if self.cancelled.load(Ordering::SeqCst) || self.is_interrupted() {
                let _ = tokio::fs::remove_file(&write_path).await;
                return Err(Error::CbInterrupted);
            }
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            window_bytes += chunk.len() as u64;
            pending += chunk.len();
            if pending >= CHUNK_FLUSH {
                file.flush().await?;
                pending = 0;
            }

            if let Some(limit) = self.config.max_speed {
                throttle_window_bytes += chunk.len() as u64;
                let elapsed = throttle_window_start.elapsed();
                let allowed = (limit as f64 * elapsed.as_secs_f64()) as u64;
                if throttle_window_bytes > allowed {
                    let excess = throttle_window_bytes - allowed;
                    tokio::time::sleep(Duration::from_secs_f64(excess as f64 / limit as f64)).await;
                }
                if elapsed >= Duration::from_secs(1) {
                    throttle_window_start = Instant::now();
                    throttle_window_bytes = 0;
                }
            }

            if let Some(cb) = &target.progress_cb {
                let decision = cb(total.unwrap_or(0), downloaded);
                if matches!(decision, crate::config::CbResult::Abort) {
                    let _ = tokio::fs::remove_file(&write_path).await;
                    return Err(Error::CbInterrupted);
                }
                if matches!(decision, crate::config::CbResult::Error) {
                    self.cancelled.store(true, Ordering::SeqCst);
                    let _ = tokio::fs::remove_file(&write_path).await;
                    return Err(Error::CbInterrupted);
                }
            }

            if window_start.elapsed() >= self.config.low_speed_time {
                let min_bytes =
                    self.config.low_speed_limit * self.config.low_speed_time.as_secs().max(1);
                if window_bytes < min_bytes {
                    return Err(Error::TemporaryErr(format!(
                        "transfer of {url} stalled below {} B/s",
                        self.config.low_speed_limit
                    )));
                }
                window_start = Instant::now();
                window_bytes = 0;
            }
        }
        file.flush().await?;
        drop(file);

        if let Some(expected) = target.expected_size {
            if downloaded != expected {
                let _ = tokio::fs::remove_file(&write_path).await;
                return Err(Error::TemporaryErr(format!(
                    "size mismatch for {url}: expected {expected}, got {downloaded}"
                )));
            }
        }

        if !append {
            tokio::fs::rename(&write_path, &target.dest_path).await?;
        }

        if let (Some((checksum_type, expected)), true) =
            (&target.checksum, self.config.checksum_enabled)
        {
            digest::verify_file(&target.dest_path, *checksum_type, expected)?;
        }

        if target.resume {
            clear_resume_sentinel(&target.dest_path);
        }

        if self.config.preserve_time {
            if let Some(mtime) = last_modified {
                let _ = filetime::set_file_mtime(&target.dest_path, filetime::FileTime::from_system_time(mtime));
            }
        }

        Ok(TransferStatus::Successful {
            path: target.dest_path.clone(),
            bytes: downloaded,
            resumed: append,
            mirror_used: mirror_url.to_string(),
        })
    }
}

fn format_range(start: u64, end: Option<u64>) -> String {
    match end {
        Some(end) if end > start => format!("bytes={start}-{end}"),
        _ => format!("bytes={start}-"),
    }
}

fn has_resume_sentinel(path: &Path) -> bool {
    xattr::get(path, RESUME_XATTR).ok().flatten().is_some()
}

fn set_resume_sentinel(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::File::create(path)?;
    }
    xattr::set(path, RESUME_XATTR, b"").map_err(|e| {
        warn!(error = %e, path = %path.display(), "failed to set resume sentinel");
        Error::Io(e)
    })
}

fn clear_resume_sentinel(path: &Path) {
    let _ = xattr::remove(path, RESUME_XATTR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::types::Mirror;

    fn engine(mirrors: Vec<Mirror>) -> DownloadEngine {
        DownloadEngine::new(
            Client::new(),
            MirrorList::new(mirrors),
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn empty_batch_returns_immediately() {
        let e = engine(vec![]);
        let result = e.run(vec![]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn no_mirrors_yields_a_terminal_error_per_target() {
        let e = engine(vec![]);
        let target = Target::new("repodata/repomd.xml", PathBuf::from("/tmp/doesnotexist-x"));
        let (_, status) = e.run_target(target).await;
        assert!(matches!(status, TransferStatus::Error { .. }));
    }

    #[tokio::test]
    async fn already_downloaded_with_matching_digest_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repomd.xml");
        std::fs::write(&path, b"hello").unwrap();
        let digest = {
            use sha2::{Digest as _, Sha256};
            let mut h = Sha256::new();
            h.update(b"hello");
            hex::encode(h.finalize())
        };
        let e = engine(vec![]);
        let target = Target::new("repodata/repomd.xml", &path)
            .resumable(true)
            .with_checksum(digest::ChecksumType::Sha256, digest);
        let status = e.check_already_downloaded(&target).await;
        assert!(matches!(status, Some(TransferStatus::AlreadyExists { .. })));
    }
}
