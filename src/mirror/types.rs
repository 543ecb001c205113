//! `Mirror` and `MirrorList`.

use url::Url;

/// A single mirror candidate and its accounting state.
#[derive(Debug, Clone)]
pub struct Mirror {
    pub url: String,
    pub preference: i32,
    pub failures: u32,
    pub successful_transfers: u32,
    pub retired: bool,
    pub measured_rtt_ms: Option<f64>,
}

impl Mirror {
    #[must_use]
    pub fn new(url: impl Into<String>, preference: i32) -> Self {
        Self {
            url: url.into(),
            preference,
            failures: 0,
            successful_transfers: 0,
            retired: false,
            measured_rtt_ms: None,
        }
    }

    /// `host:port` used to key the fastest-mirror cache and to group
    /// per-mirror concurrency.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        let parsed = Url::parse(&self.url).ok()?;
        let host = parsed.host_str()?;
        Some(match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    #[must_use]
    pub fn scheme(&self) -> Option<String> {
        Url::parse(&self.url).ok().map(|u| u.scheme().to_string())
    }

    /// failures / max(1, failures + successes); higher is worse.
    #[must_use]
    pub fn failure_score(&self) -> f64 {
        f64::from(self.failures) / f64::from((self.failures + self.successful_transfers).max(1))
    }

    /// A mirror is retired once it has accumulated `allowed_mirror_failures`
    /// failures with zero successes.
    pub fn record_failure(&mut self, allowed_mirror_failures: u32) {
        self.failures += 1;
        if self.failures >= allowed_mirror_failures && self.successful_transfers == 0 {
            self.retired = true;
        }
    }

    pub fn record_success(&mut self) {
        self.successful_transfers += 1;
    }
}

/// The ordered, per-Handle mirror list produced by `MirrorResolver` and
/// maintained by the engine.
#[derive(Debug, Clone, Default)]
pub struct MirrorList {
    mirrors: Vec<Mirror>,
}

impl MirrorList {
    #[must_use]
    pub fn new(mirrors: Vec<Mirror>) -> Self {
        Self { mirrors }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Mirror] {
        &self.mirrors
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Mirror> {
        self.mirrors.iter_mut()
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Mirror> {
        self.mirrors.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Mirror> {
        self.mirrors.get_mut(idx)
    }

    /// Initial ordering: retired last, then descending preference, then
    /// ascending measured RTT.
    pub fn sort_initial(&mut self) {
        self.mirrors.sort_by(|a, b| {
            a.retired
                .cmp(&b.retired)
                .then(b.preference.cmp(&a.preference))
                .then(
                    a.measured_rtt_ms
                        .unwrap_or(f64::INFINITY)
                        .total_cmp(&b.measured_rtt_ms.unwrap_or(f64::INFINITY)),
                )
        });
    }

    /// Sort by measured latency ascending; ties broken by original
    /// preference.
    pub fn sort_by_latency(&mut self) {
        self.mirrors.sort_by(|a, b| {
            a.measured_rtt_ms
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.measured_rtt_ms.unwrap_or(f64::INFINITY))
                .then(b.preference.cmp(&a.preference))
        });
    }

    /// Restable-sort the non-retired prefix by ascending failure score,
    /// ties broken by original preference.
    pub fn adaptive_resort(&mut self) {
        let split = self.mirrors.partition_point(|m| !m.retired);
        self.mirrors[..split].sort_by(|a, b| {
            a.failure_score()
                .total_cmp(&b.failure_score())
                .then(b.preference.cmp(&a.preference))
        });
    }

    /// Append `mirror` unless a mirror with the same canonical URL is
    /// already present (deduplicate by canonical URL, preserving first
    /// occurrence).
    pub fn push_dedup(&mut self, mirror: Mirror) {
        if !self.mirrors.iter().any(|m| m.url == mirror.url) {
            self.mirrors.push(mirror);
        }
    }

    pub fn into_vec(self) -> Vec<Mirror> {
        self.mirrors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_includes_port() {
        let m = Mirror::new("http://example.com:8080/repo", 0);
        assert_eq!(m.host().as_deref(), Some("example.com:8080"));
    }

    #[test]
    fn failure_score_orders_worse_mirrors_last() {
        let mut list = MirrorList::new(vec![
            Mirror {
                failures: 3,
                successful_transfers: 0,
                ..Mirror::new("http://bad", 5)
            },
            Mirror {
                failures: 1,
                successful_transfers: 9,
                ..Mirror::new("http://good", 1)
            },
        ]);
        list.adaptive_resort();
        assert_eq!(list.as_slice()[0].url, "http://good");
    }

    #[test]
    fn retirement_requires_zero_successes() {
        let mut m = Mirror::new("http://x", 0);
        m.record_success();
        for _ in 0..10 {
            m.record_failure(4);
        }
        assert!(!m.retired, "a mirror with any success is never retired");
    }

    #[test]
    fn push_dedup_keeps_first_occurrence() {
        let mut list = MirrorList::default();
        list.push_dedup(Mirror::new("http://a", 10));
        list.push_dedup(Mirror::new("http://a", 5));
        assert_eq!(list.len(), 1);
        assert_eq!(list.as_slice()[0].preference, 10);
    }
}
