//! `Handle` (spec §3): a configuration + session object. Owns the resolved
//! mirror list, the last parsed metalink, and the result of the previous
//! fetch, and ties `MirrorResolver`, `FastestMirror`, `DownloadEngine`,
//! `Verifier` and `MetadataFetch` into the pipeline described in spec §2.
//!
//! The "once any fetch is in progress, configuration is frozen" invariant
//! (spec §3) is enforced structurally: every fetch method takes `&mut
//! self` and holds that borrow for its whole `async` body, so the borrow
//! checker — not a runtime flag — prevents a caller from mutating
//! `self.config` mid-fetch.

use std::path::PathBuf;

use reqwest::Client;
use tracing::instrument;

use crate::config::HandleConfig;
use crate::core::error::{Error, Result};
use crate::core::http;
use crate::engine::download::{DownloadEngine, EngineConfig};
use crate::engine::target::{Target, TransferStatus};
use crate::metadata::fetch::MetadataFetch;
use crate::metadata::result::FetchResult;
use crate::mirror::metalink::Metalink;
use crate::mirror::resolver::{self, ResolvedMirrors, SourceFetcher};
use crate::mirror::types::MirrorList;

/// Fetches mirror-source documents (`mirrorlist_url` / `metalink_url`)
/// over the Handle's own HTTP client, or from the local filesystem for
/// `file://` and plain local paths (spec §4.1 "not already a local path").
struct HttpSourceFetcher {
    client: Client,
}

/// Default `fastest_mirror_cache` location when the caller leaves it unset
/// (spec §4.2 "persistent cache"): `$XDG_CACHE_HOME/librepo/fastest_mirror`,
/// falling back to no cache at all if the platform has no cache directory.
fn default_fastest_mirror_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("librepo").join("fastest_mirror"))
}

fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if !url.contains("://") {
        return Some(PathBuf::from(url));
    }
    None
}

#[async_trait::async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        if let Some(path) = local_path(url) {
            return tokio::fs::read_to_string(&path).await.map_err(Error::Io);
        }
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::BadStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response.text().await.map_err(Error::from)
    }
}

/// A configured, reusable session against one repository (spec §3
/// `Handle`). A `Handle` may be reused sequentially: each fetch resolves
/// mirrors if they are not already cached from a previous call, and
/// `update=true` fetches layer onto the previous [`FetchResult`].
pub struct Handle {
    config: HandleConfig,
    client: Client,
    mirrors: Option<MirrorList>,
    metalink: Option<Metalink>,
    mirrorlist_text: Option<String>,
    mirrorlist_was_metalink: bool,
    metalink_text: Option<String>,
    last_result: Option<FetchResult>,
    interrupt: Option<std::sync::Arc<std::sync::atomic::AtomicBool>>,
}

impl Handle {
    /// Construct a `Handle`, validating `config` synchronously (spec §7
    /// "Caller" error class — raised before any fetch starts).
    pub fn new(config: HandleConfig) -> Result<Self> {
        config.validate()?;
        let client = http::build_client(&config)?;
        let interrupt = config
            .interruptible
            .then(|| std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)));
        Ok(Self {
            config,
            client,
            mirrors: None,
            metalink: None,
            mirrorlist_text: None,
            mirrorlist_was_metalink: false,
            metalink_text: None,
            last_result: None,
            interrupt,
        })
    }

    #[must_use]
    pub fn config(&self) -> &HandleConfig {
        &self.config
    }

    /// Abort the in-flight `perform()`/`download_packages()` call, if any
    /// (spec §6.1 `interruptible`). A no-op when `interruptible` wasn't set
    /// on this Handle's config.
    pub fn interrupt(&self) {
        if let Some(flag) = &self.interrupt {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    /// The resolved mirror list, if mirror resolution has already run
    /// (mirrors the original Python binding's `h.mirrors` attribute).
    #[must_use]
    pub fn mirrors(&self) -> Option<&MirrorList> {
        self.mirrors.as_ref()
    }

    /// The last parsed metalink document, if a metalink source was used.
    #[must_use]
    pub fn metalink(&self) -> Option<&Metalink> {
        self.metalink.as_ref()
    }

    /// The result of the most recent `perform()` call, retained so a
    /// subsequent `update=true` fetch can augment it (spec §4.5 "Update
    /// mode").
    #[must_use]
    pub fn last_result(&self) -> Option<&FetchResult> {
        self.last_result.as_ref()
    }

    /// Run `MirrorResolver` (spec §4.1) and, if `fastest_mirror` is set,
    /// `FastestMirror` (spec §4.2) over the result. Idempotent: a second
    /// call re-resolves from scratch, discarding any adaptive
    /// re-ranking/retirement state accumulated by a prior fetch.
    #[instrument(skip(self))]
    pub async fn resolve_mirrors(&mut self) -> Result<&MirrorList> {
        if self.config.local_only {
            self.mirrors = Some(MirrorList::default());
            return Ok(self.mirrors.as_ref().unwrap());
        }

        let fetcher = HttpSourceFetcher {
            client: self.client.clone(),
        };
        let ResolvedMirrors {
            mut mirrors,
            metalink,
            mirrorlist_text,
            mirrorlist_was_metalink,
            metalink_text,
        } = resolver::resolve(&self.config, &fetcher).await?;

        if self.config.fastest_mirror {
            let cache_path = self
                .config
                .fastest_mirror_cache
                .clone()
                .or_else(default_fastest_mirror_cache_path);
            let cb = self.config.fastest_mirror_cb.clone();
            crate::mirror::fastest::run(
                &mut mirrors,
                cache_path.as_deref(),
                self.config.fastest_mirror_max_age,
                self.config.fastest_mirror_timeout,
                |stage| {
                    if let Some(cb) = &cb {
                        cb(stage);
                    }
                },
            )
            .await?;
        }

        self.mirrors = Some(mirrors);
        self.metalink = metalink;
        self.mirrorlist_text = mirrorlist_text;
        self.mirrorlist_was_metalink = mirrorlist_was_metalink;
        self.metalink_text = metalink_text;

        Ok(self.mirrors.as_ref().unwrap())
    }

    async fn ensure_mirrors(&mut self) -> Result<()> {
        if self.mirrors.is_none() {
            self.resolve_mirrors().await?;
        }
        Ok(())
    }

    /// Materialize a fetched mirrorlist/metalink document under `destdir`
    /// for later reinspection (spec §6.2). Returns the paths written.
    fn materialize_mirror_sources(&self, destdir: &std::path::Path) -> Result<(Option<PathBuf>, Option<PathBuf>)> {
        let mut mirrorlist_path = None;
        let mut metalink_path = None;

        if let Some(text) = &self.mirrorlist_text {
            if self.mirrorlist_was_metalink {
                let path = destdir.join("metalink.xml");
                std::fs::write(&path, text)?;
                metalink_path = Some(path);
            } else {
                let path = destdir.join("mirrorlist");
                std::fs::write(&path, text)?;
                mirrorlist_path = Some(path);
            }
        }
        if let Some(text) = &self.metalink_text {
            let path = destdir.join("metalink.xml");
            std::fs::write(&path, text)?;
            metalink_path = Some(path);
        }

        Ok((mirrorlist_path, metalink_path))
    }

    /// Run the two-phase `repomd.xml` + records fetch (spec §4.5) and
    /// assemble a [`FetchResult`] (spec §4.6). Not valid when
    /// `fetch_mirrors_only` is set — call [`Handle::resolve_mirrors`]
    /// instead.
    #[instrument(skip(self))]
    pub async fn perform(&mut self) -> Result<&FetchResult> {
        if self.config.fetch_mirrors_only {
            return Err(Error::BadFuncArg(
                "fetch_mirrors_only handles cannot perform a full fetch".to_string(),
            ));
        }
        if self.config.update && self.last_result.is_none() {
            return Err(Error::IncompleteResult(
                "update=true requires a previous perform() result on this Handle".to_string(),
            ));
        }

        self.ensure_mirrors().await?;
        let mirrors = self.mirrors.take().unwrap_or_default();

        let fetch = MetadataFetch::new(&self.config, self.client.clone())
            .with_interrupt(self.interrupt.clone());
        let (mut result, mirrors) = fetch.run(mirrors, self.last_result.as_ref()).await?;
        self.mirrors = Some(mirrors);

        if !self.config.local_only {
            if let Some(destdir) = &self.config.destdir {
                let (mirrorlist_path, metalink_path) = self.materialize_mirror_sources(destdir)?;
                if result.mirrorlist_path.is_none() {
                    result.mirrorlist_path = mirrorlist_path;
                }
                if result.metalink_path.is_none() {
                    result.metalink_path = metalink_path;
                }
            }
        }

        self.last_result = Some(result);
        Ok(self.last_result.as_ref().unwrap())
    }

    /// Fetch an arbitrary batch of targets in parallel across the resolved
    /// mirror list (spec §4.4 `download_packages`). `fail_fast` selects
    /// the cancellation mode of spec §4.4; `false` always returns `Ok`,
    /// one entry per target, with per-target errors inspectable on the
    /// returned [`TransferStatus`].
    #[instrument(skip(self, targets))]
    pub async fn download_packages(
        &mut self,
        targets: Vec<Target>,
        fail_fast: bool,
    ) -> Result<Vec<(Target, TransferStatus)>> {
        self.ensure_mirrors().await?;
        let mirrors = self.mirrors.take().unwrap_or_default();

        let engine_config = EngineConfig {
            max_parallel_downloads: self.config.max_parallel_downloads,
            max_downloads_per_mirror: self.config.max_downloads_per_mirror,
            max_mirror_tries: self.config.max_mirror_tries,
            allowed_mirror_failures: self.config.allowed_mirror_failures,
            adaptive_mirror_sorting: self.config.adaptive_mirror_sorting,
            checksum_enabled: self.config.checksum_enabled,
            low_speed_limit: self.config.low_speed_limit,
            low_speed_time: self.config.low_speed_time,
            fail_fast,
            userpwd: self.config.userpwd.clone(),
            http_auth: self.config.http_auth,
            http_auth_methods: self.config.http_auth_methods,
            max_speed: self.config.max_speed,
            preserve_time: self.config.preserve_time,
            interrupt: self.interrupt.clone(),
        };

        let engine = DownloadEngine::new(self.client.clone(), mirrors, engine_config);
        let results = engine.run(targets).await;
        // Recover the mirror list as resorted/retired by this batch (spec
        // §5: "mirror-list mutations become visible between cycles") so
        // the next call against this Handle keeps the accounting.
        self.mirrors = Some(engine.into_mirrors().await);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_path_recognizes_file_scheme_and_plain_paths() {
        assert_eq!(
            local_path("file:///srv/repo/mirrorlist"),
            Some(PathBuf::from("/srv/repo/mirrorlist"))
        );
        assert_eq!(
            local_path("/srv/repo/mirrorlist"),
            Some(PathBuf::from("/srv/repo/mirrorlist"))
        );
        assert_eq!(local_path("http://example.com/mirrorlist"), None);
    }

    #[test]
    fn new_rejects_a_handle_with_no_urls() {
        let config = HandleConfig::new();
        let err = Handle::new(config).unwrap_err();
        assert_eq!(err.code(), crate::core::error::ErrorCode::NoUrl);
    }

    #[test]
    fn new_accepts_fetch_mirrors_only_with_no_urls() {
        let config = HandleConfig::new().fetch_mirrors_only(true);
        assert!(Handle::new(config).is_ok());
    }

    #[tokio::test]
    async fn perform_rejects_fetch_mirrors_only_handles() {
        let config = HandleConfig::new()
            .urls(["http://example/"])
            .fetch_mirrors_only(true);
        let mut handle = Handle::new(config).unwrap();
        let err = handle.perform().await.unwrap_err();
        assert_eq!(err.code(), crate::core::error::ErrorCode::BadFuncArg);
    }

    #[tokio::test]
    async fn update_without_a_prior_result_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = HandleConfig::new()
            .urls(["http://example/"])
            .destdir(dir.path())
            .update(true);
        let mut handle = Handle::new(config).unwrap();
        let err = handle.perform().await.unwrap_err();
        assert_eq!(err.code(), crate::core::error::ErrorCode::IncompleteResult);
    }

    #[tokio::test]
    async fn resolve_mirrors_on_local_only_handle_yields_an_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("repodata")).unwrap();
        let config = HandleConfig::new().local(true).destdir(dir.path());
        let mut handle = Handle::new(config).unwrap();
        let mirrors = handle.resolve_mirrors().await.unwrap();
        assert!(mirrors.is_empty());
    }
}
