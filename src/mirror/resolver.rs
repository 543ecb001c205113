//! `MirrorResolver`: turn `base_urls` / `mirrorlist_url` /
//! `metalink_url` into an ordered [`MirrorList`].

use crate::config::HandleConfig;
use crate::core::error::{Error, Result};
use crate::mirror::metalink::{self, Metalink};
use crate::mirror::mirrorlist;
use crate::mirror::types::{Mirror, MirrorList};

/// A fetcher abstraction so the resolver can be unit tested without a real
/// network/filesystem round trip. The engine's HTTP/file reader implements
/// this for production use.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// The outcome of mirror resolution: the ordered list plus whatever was
/// materialized for later inspection.
#[derive(Debug, Default)]
pub struct ResolvedMirrors {
    pub mirrors: MirrorList,
    pub metalink: Option<Metalink>,
    pub mirrorlist_text: Option<String>,
    pub mirrorlist_was_metalink: bool,
    /// Raw XML of a document fetched via `metalink_url` specifically (as
    /// opposed to a metalink document discovered at `mirrorlist_url`,
    /// which is already captured in `mirrorlist_text`). Used to
    /// materialize `destdir/metalink.xml`.
    pub metalink_text: Option<String>,
}

/// For `RpmMd`, metalink URLs name `repomd.xml`; strip the
/// `/repodata/repomd.xml` suffix to recover the repository root.
#[must_use]
pub fn strip_repomd_suffix(url: &str) -> String {
    url.strip_suffix("/repodata/repomd.xml")
        .map(str::to_string)
        .unwrap_or_else(|| url.to_string())
}

fn is_local_scheme(url: &str) -> bool {
    url.starts_with("file://") || (!url.contains("://") && url.starts_with('/'))
}

/// Run the resolution algorithm. `fetcher` is used for any
/// `mirrorlist_url` / `metalink_url` that is not already a local path.
pub async fn resolve(
    config: &HandleConfig,
    fetcher: &dyn SourceFetcher,
) -> Result<ResolvedMirrors> {
    let mut list = MirrorList::default();
    let mut next_preference = (config.base_urls.len()
        + usize::from(config.mirrorlist_url.is_some())
        + usize::from(config.metalink_url.is_some()))
        as i32
        * 10;

    // Step 2: base URLs, highest preference.
    for raw in &config.base_urls {
        let expanded = config.substitute(raw);
        if config.offline && !is_local_scheme(&expanded) {
            continue;
        }
        list.push_dedup(Mirror::new(expanded, next_preference));
        next_preference -= 1;
    }

    let mut metalink: Option<Metalink> = None;
    let mut mirrorlist_text: Option<String> = None;
    let mut mirrorlist_was_metalink = false;
    let mut metalink_text: Option<String> = None;

    // Step 3: mirrorlist_url (may itself be metalink-shaped).
    if let Some(url) = &config.mirrorlist_url {
        let local = is_local_scheme(url);
        if local || !config.offline {
            match fetcher.fetch_text(url).await {
                Ok(content) => {
                    if mirrorlist::looks_like_metalink(&content) {
                        mirrorlist_was_metalink = true;
                        let parsed = metalink::parse(&content)?;
                        append_metalink(&mut list, config.repo_type_is_rpm_md(), &parsed, config, &mut next_preference);
                        metalink = Some(parsed);
                    } else {
                        for raw in mirrorlist::parse(&content) {
                            let expanded = config.substitute(&raw);
                            list.push_dedup(Mirror::new(expanded, next_preference));
                            next_preference -= 1;
                        }
                    }
                    mirrorlist_text = Some(content);
                }
                Err(err) => {
                    // Non-fatal while at least one base URL remains.
                    if list.is_empty() {
                        return Err(err);
                    }
                }
            }
        }
    }

    // Step 4: metalink_url, must parse as metalink.
    if let Some(url) = &config.metalink_url {
        let local = is_local_scheme(url);
        if local || !config.offline {
            let content = fetcher.fetch_text(url).await?;
            let parsed = metalink::parse(&content)?;
            append_metalink(&mut list, config.repo_type_is_rpm_md(), &parsed, config, &mut next_preference);
            metalink_text = Some(content);
            metalink = Some(parsed);
        }
    }

    list.sort_initial();

    if list.is_empty() && !config.fetch_mirrors_only {
        return Err(Error::NoUrl);
    }

    Ok(ResolvedMirrors {
        mirrors: list,
        metalink,
        mirrorlist_text,
        mirrorlist_was_metalink,
        metalink_text,
    })
}

fn append_metalink(
    list: &mut MirrorList,
    is_rpm_md: bool,
    parsed: &Metalink,
    config: &HandleConfig,
    next_preference: &mut i32,
) {
    let mut urls: Vec<_> = parsed.urls.clone();
    urls.sort_by(|a, b| b.preference.cmp(&a.preference));
    for entry in urls {
        let mut url = entry.url;
        if is_rpm_md {
            url = strip_repomd_suffix(&url);
        }
        let url = config.substitute(&url);
        list.push_dedup(Mirror::new(url, *next_preference));
        *next_preference -= 1;
    }
}

impl HandleConfig {
    fn repo_type_is_rpm_md(&self) -> bool {
        matches!(self.repo_type, crate::config::RepoType::RpmMd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeFetcher {
        responses: Mutex<HashMap<String, Result<String>>>,
    }

    #[async_trait::async_trait]
    impl SourceFetcher for FakeFetcher {
        async fn fetch_text(&self, url: &str) -> Result<String> {
            let mut guard = self.responses.lock().unwrap();
            match guard.remove(url) {
                Some(Ok(s)) => Ok(s),
                Some(Err(e)) => Err(e),
                None => Err(Error::BadUrl(url.to_string())),
            }
        }
    }

    fn fetcher(pairs: Vec<(&str, &str)>) -> FakeFetcher {
        FakeFetcher {
            responses: Mutex::new(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), Ok(v.to_string())))
                    .collect(),
            ),
        }
    }

    #[tokio::test]
    async fn empty_config_without_fetch_mirrors_only_fails() {
        let config = HandleConfig::new();
        let f = fetcher(vec![]);
        let err = resolve(&config, &f).await.unwrap_err();
        assert_eq!(err.code(), crate::core::error::ErrorCode::NoUrl);
    }

    #[tokio::test]
    async fn base_urls_rank_above_mirrorlist_entries() {
        let config = HandleConfig::new()
            .urls(["http://base/"])
            .mirrorlist("http://ml/mirrorlist");
        let f = fetcher(vec![("http://ml/mirrorlist", "http://from-list/\n")]);
        let resolved = resolve(&config, &f).await.unwrap();
        let urls: Vec<_> = resolved
            .mirrors
            .as_slice()
            .iter()
            .map(|m| m.url.as_str())
            .collect();
        assert_eq!(urls, vec!["http://base/", "http://from-list/"]);
    }

    #[tokio::test]
    async fn metalink_urls_are_root_stripped_for_rpm_md() {
        let config = HandleConfig::new().metalink("http://ml/metalink");
        let xml = r#"<metalink><files><file name="repomd.xml">
            <resources>
              <url preference="100">http://good/repodata/repomd.xml</url>
            </resources>
        </file></files></metalink>"#;
        let f = fetcher(vec![("http://ml/metalink", xml)]);
        let resolved = resolve(&config, &f).await.unwrap();
        assert_eq!(resolved.mirrors.as_slice()[0].url, "http://good");
    }

    #[tokio::test]
    async fn mirrorlist_source_failure_is_non_fatal_with_a_base_url() {
        let config = HandleConfig::new()
            .urls(["http://base/"])
            .mirrorlist("http://ml/down");
        let f = fetcher(vec![]);
        let resolved = resolve(&config, &f).await.unwrap();
        assert_eq!(resolved.mirrors.len(), 1);
    }

    #[tokio::test]
    async fn substitution_expands_dollar_vars() {
        let config = HandleConfig::new()
            .urls(["http://mirror/$basearch/$releasever/"])
            .substitutions(vec![
                ("basearch".to_string(), "x86_64".to_string()),
                ("releasever".to_string(), "39".to_string()),
            ]);
        let f = fetcher(vec![]);
        let resolved = resolve(&config, &f).await.unwrap();
        assert_eq!(
            resolved.mirrors.as_slice()[0].url,
            "http://mirror/x86_64/39/"
        );
    }

    #[tokio::test]
    async fn unknown_substitution_names_are_left_literal() {
        let config = HandleConfig::new().urls(["http://mirror/$unknown/"]);
        let f = fetcher(vec![]);
        let resolved = resolve(&config, &f).await.unwrap();
        assert_eq!(resolved.mirrors.as_slice()[0].url, "http://mirror/$unknown/");
    }
}
