//! Handle configuration surface.
//!
//! `HandleConfig` is a plain data aggregate built with typed setter methods,
//! modeling a `setopt(name, value)`-style option surface as distinct fields
//! instead of a stringly-typed option bag.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::{Error, Result};

/// Only one repository type is implemented (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepoType {
    #[default]
    RpmMd,
}

/// `proxytype` (spec §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    Http,
    Http10,
    Socks4,
    Socks4a,
    Socks5,
    Socks5Hostname,
}

/// IP family restriction (spec §6.1 `ipresolve`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpResolve {
    #[default]
    Any,
    V4,
    V6,
}

/// `httpauthmethods` / `proxyauthmethods` bitmask (spec §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthMethods(u32);

impl AuthMethods {
    pub const NONE: AuthMethods = AuthMethods(0);
    pub const BASIC: AuthMethods = AuthMethods(0b0000_0001);
    pub const DIGEST: AuthMethods = AuthMethods(0b0000_0010);
    pub const NEGOTIATE: AuthMethods = AuthMethods(0b0000_0100);
    pub const NTLM: AuthMethods = AuthMethods(0b0000_1000);
    pub const DIGEST_IE: AuthMethods = AuthMethods(0b0001_0000);
    pub const NTLM_WB: AuthMethods = AuthMethods(0b0010_0000);
    pub const AUTH_ONLY: AuthMethods = AuthMethods(0b0100_0000);
    pub const ANY: AuthMethods = AuthMethods(0b0111_1111);

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: AuthMethods) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AuthMethods {
    type Output = AuthMethods;
    fn bitor(self, rhs: AuthMethods) -> AuthMethods {
        AuthMethods(self.0 | rhs.0)
    }
}

/// Outcome a callback returns to steer the engine (spec Design Notes:
/// "callback return protocol replaces exception-driven cancellation").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CbResult {
    #[default]
    Ok,
    /// Cancel only the target this callback was invoked for.
    Abort,
    /// Cancel the whole fetch.
    Error,
}

/// `progresscb(userdata, total, downloaded)` (spec §6.1).
pub type ProgressCb = Arc<dyn Fn(u64, u64) -> CbResult + Send + Sync>;

/// `fastestmirrorcb(userdata, stage, data)` (spec §4.2).
pub type FastestMirrorCb = Arc<dyn Fn(crate::mirror::fastest::FastestMirrorStage) + Send + Sync>;

/// `handlemirrorfailurecb(userdata, msg, url, metadata)` (spec §4.4).
pub type MirrorFailureCb = Arc<dyn Fn(&str, &str, &str) -> CbResult + Send + Sync>;

/// TLS and client-auth material (spec §3 "TLS/auth/proxy material").
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub ssl_verify_peer: bool,
    pub ssl_verify_host: bool,
    pub ssl_ca_cert: Option<PathBuf>,
    pub ssl_client_cert: Option<PathBuf>,
    pub ssl_client_key: Option<PathBuf>,
}

/// Proxy material (spec §3, §6.1).
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub url: Option<String>,
    pub port: Option<u16>,
    pub proxy_type: Option<ProxyType>,
    pub auth_methods: AuthMethods,
    pub userpwd: Option<String>,
}

/// A per-Handle configuration aggregate. Immutable once a fetch starts
/// (spec §3 invariant: "once any fetch is in progress against a Handle, its
/// configuration is frozen until that fetch returns" — enforced by
/// `Handle::perform` taking `&mut self` and holding the borrow for the
/// duration of the fetch, not by this type itself).
#[derive(Clone)]
pub struct HandleConfig {
    pub base_urls: Vec<String>,
    pub mirrorlist_url: Option<String>,
    pub metalink_url: Option<String>,
    pub repo_type: RepoType,
    pub destdir: Option<PathBuf>,
    pub local_only: bool,
    pub offline: bool,
    pub update: bool,
    pub checksum_enabled: bool,
    pub gpg_check: bool,
    pub fetch_mirrors_only: bool,
    pub allow_list: Option<Vec<Option<String>>>,
    pub deny_list: Vec<String>,
    pub substitution_map: Vec<(String, String)>,
    pub record_substitution: Vec<(String, String)>,

    pub max_parallel_downloads: usize,
    pub max_downloads_per_mirror: usize,
    pub max_mirror_tries: usize,
    pub allowed_mirror_failures: u32,
    pub adaptive_mirror_sorting: bool,

    pub fastest_mirror: bool,
    pub fastest_mirror_cache: Option<PathBuf>,
    pub fastest_mirror_max_age: Duration,
    pub fastest_mirror_timeout: Duration,

    pub low_speed_limit: u64,
    pub low_speed_time: Duration,
    pub connect_timeout: Duration,
    pub max_speed: Option<u64>,

    pub ignore_missing: bool,
    pub interruptible: bool,
    pub preserve_time: bool,
    pub follow_location: bool,

    pub user_agent: String,
    pub extra_headers: Vec<(String, Option<String>)>,
    pub ip_resolve: IpResolve,
    pub ftp_use_epsv: bool,

    pub userpwd: Option<String>,
    pub http_auth: bool,
    pub http_auth_methods: AuthMethods,
    pub proxy: ProxyConfig,
    pub tls: TlsConfig,

    pub gnupghomedir: Option<PathBuf>,

    pub progress_cb: Option<ProgressCb>,
    pub fastest_mirror_cb: Option<FastestMirrorCb>,
    pub handle_mirror_failure_cb: Option<MirrorFailureCb>,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            base_urls: Vec::new(),
            mirrorlist_url: None,
            metalink_url: None,
            repo_type: RepoType::default(),
            destdir: None,
            local_only: false,
            offline: false,
            update: false,
            checksum_enabled: true,
            gpg_check: false,
            fetch_mirrors_only: false,
            allow_list: None,
            deny_list: Vec::new(),
            substitution_map: Vec::new(),
            record_substitution: Vec::new(),

            max_parallel_downloads: 3,
            max_downloads_per_mirror: 3,
            max_mirror_tries: 0,
            allowed_mirror_failures: 4,
            adaptive_mirror_sorting: true,

            fastest_mirror: false,
            fastest_mirror_cache: None,
            fastest_mirror_max_age: Duration::from_secs(3 * 24 * 60 * 60),
            fastest_mirror_timeout: Duration::from_secs_f64(2.0),

            low_speed_limit: 1000,
            low_speed_time: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            max_speed: None,

            ignore_missing: false,
            interruptible: false,
            preserve_time: false,
            follow_location: true,

            user_agent: "librepo-rs/0.1".to_string(),
            extra_headers: Vec::new(),
            ip_resolve: IpResolve::default(),
            ftp_use_epsv: true,

            userpwd: None,
            http_auth: false,
            http_auth_methods: AuthMethods::BASIC,
            proxy: ProxyConfig::default(),
            tls: TlsConfig {
                ssl_verify_peer: true,
                ssl_verify_host: true,
                ..TlsConfig::default()
            },

            gnupghomedir: None,

            progress_cb: None,
            fastest_mirror_cb: None,
            handle_mirror_failure_cb: None,
        }
    }
}

impl std::fmt::Debug for HandleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleConfig")
            .field("base_urls", &self.base_urls)
            .field("mirrorlist_url", &self.mirrorlist_url)
            .field("metalink_url", &self.metalink_url)
            .field("destdir", &self.destdir)
            .field("local_only", &self.local_only)
            .field("offline", &self.offline)
            .field("update", &self.update)
            .field("checksum_enabled", &self.checksum_enabled)
            .field("gpg_check", &self.gpg_check)
            .field("max_parallel_downloads", &self.max_parallel_downloads)
            .field("max_downloads_per_mirror", &self.max_downloads_per_mirror)
            .finish_non_exhaustive()
    }
}

impl HandleConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn urls(mut self, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.base_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn mirrorlist(mut self, url: impl Into<String>) -> Self {
        self.mirrorlist_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn metalink(mut self, url: impl Into<String>) -> Self {
        self.metalink_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn destdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.destdir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn local(mut self, val: bool) -> Self {
        self.local_only = val;
        self
    }

    #[must_use]
    pub fn offline(mut self, val: bool) -> Self {
        self.offline = val;
        self
    }

    #[must_use]
    pub fn update(mut self, val: bool) -> Self {
        self.update = val;
        self
    }

    #[must_use]
    pub fn checksum(mut self, val: bool) -> Self {
        self.checksum_enabled = val;
        self
    }

    #[must_use]
    pub fn gpg_check(mut self, val: bool) -> Self {
        self.gpg_check = val;
        self
    }

    #[must_use]
    pub fn fetch_mirrors_only(mut self, val: bool) -> Self {
        self.fetch_mirrors_only = val;
        self
    }

    /// `yumdlist`. A `None` element is the sentinel meaning "include the
    /// manifest itself" (spec §4.5).
    #[must_use]
    pub fn allow_list(mut self, list: Vec<Option<String>>) -> Self {
        self.allow_list = Some(list);
        self
    }

    /// `yumblist`.
    #[must_use]
    pub fn deny_list(mut self, list: Vec<String>) -> Self {
        self.deny_list = list;
        self
    }

    /// `varsub`: list of (name, value) pairs for `$name` expansion in URLs.
    #[must_use]
    pub fn substitutions(mut self, pairs: Vec<(String, String)>) -> Self {
        self.substitution_map = pairs;
        self
    }

    /// `yumslist`: record-type substitution list.
    #[must_use]
    pub fn record_substitutions(mut self, pairs: Vec<(String, String)>) -> Self {
        self.record_substitution = pairs;
        self
    }

    #[must_use]
    pub fn max_parallel_downloads(mut self, n: usize) -> Self {
        self.max_parallel_downloads = n;
        self
    }

    #[must_use]
    pub fn max_downloads_per_mirror(mut self, n: usize) -> Self {
        self.max_downloads_per_mirror = n;
        self
    }

    #[must_use]
    pub fn max_mirror_tries(mut self, n: usize) -> Self {
        self.max_mirror_tries = n;
        self
    }

    #[must_use]
    pub fn allowed_mirror_failures(mut self, n: u32) -> Self {
        self.allowed_mirror_failures = n;
        self
    }

    #[must_use]
    pub fn adaptive_mirror_sorting(mut self, val: bool) -> Self {
        self.adaptive_mirror_sorting = val;
        self
    }

    #[must_use]
    pub fn fastest_mirror(mut self, val: bool) -> Self {
        self.fastest_mirror = val;
        self
    }

    #[must_use]
    pub fn fastest_mirror_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.fastest_mirror_cache = Some(path.into());
        self
    }

    #[must_use]
    pub fn fastest_mirror_max_age(mut self, secs: u64) -> Self {
        self.fastest_mirror_max_age = Duration::from_secs(secs);
        self
    }

    #[must_use]
    pub fn fastest_mirror_timeout(mut self, timeout: Duration) -> Self {
        self.fastest_mirror_timeout = timeout;
        self
    }

    #[must_use]
    pub fn progress_cb(mut self, cb: ProgressCb) -> Self {
        self.progress_cb = Some(cb);
        self
    }

    #[must_use]
    pub fn fastest_mirror_cb(mut self, cb: FastestMirrorCb) -> Self {
        self.fastest_mirror_cb = Some(cb);
        self
    }

    #[must_use]
    pub fn handle_mirror_failure_cb(mut self, cb: MirrorFailureCb) -> Self {
        self.handle_mirror_failure_cb = Some(cb);
        self
    }

    #[must_use]
    pub fn gnupghomedir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.gnupghomedir = Some(dir.into());
        self
    }

    /// Expand `$name` occurrences in `url` using `substitution_map`.
    /// Unknown names are left literal (spec §4.1 step 6).
    #[must_use]
    pub fn substitute(&self, url: &str) -> String {
        substitute_vars(url, &self.substitution_map)
    }

    /// Synchronous caller-error validation (spec §7 "Caller" taxonomy),
    /// raised before any transfer begins.
    pub fn validate(&self) -> Result<()> {
        if self.base_urls.is_empty()
            && self.mirrorlist_url.is_none()
            && self.metalink_url.is_none()
            && !self.fetch_mirrors_only
            && !self.local_only
        {
            return Err(Error::NoUrl);
        }
        if self.max_downloads_per_mirror == 0 {
            return Err(Error::BadOptArg(
                "max_downloads_per_mirror must be >= 1".to_string(),
            ));
        }
        if self.max_parallel_downloads == 0 {
            return Err(Error::BadOptArg(
                "max_parallel_downloads must be >= 1".to_string(),
            ));
        }
        if self.local_only && self.base_urls.is_empty() && self.destdir.is_none() {
            return Err(Error::BadFuncArg(
                "local_only requires either base_urls[0] or destdir".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand every `$name` in `url` using `vars`. Unknown names are left as-is.
#[must_use]
pub fn substitute_vars(url: &str, vars: &[(String, String)]) -> String {
    let mut out = url.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("${name}"), value);
    }
    out
}

/// `(alias, real)` lookup used for both allow-list record aliasing and
/// generic variable substitution maps.
#[must_use]
pub fn resolve_alias<'a>(name: &'a str, pairs: &'a [(String, String)]) -> &'a str {
    pairs
        .iter()
        .find(|(alias, _)| alias == name)
        .map_or(name, |(_, real)| real.as_str())
}

/// Build a lookup map from a substitution pair list (last write wins).
#[must_use]
pub fn pairs_to_map(pairs: &[(String, String)]) -> HashMap<String, String> {
    pairs.iter().cloned().collect()
}

