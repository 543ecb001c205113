//! `FastestMirror`: reorder a [`MirrorList`] by a cheap TCP connect-latency
//! probe, persisted in a text cache file with a TTL.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::net::TcpStream;

use crate::core::error::Result;
use crate::mirror::types::MirrorList;

/// Stages emitted via `fastestmirrorcb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastestMirrorStage {
    Init,
    CacheLoading,
    CacheLoadingStatus,
    Detection { candidates: usize },
    Finishing,
    Status,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    recorded_at: u64,
    rtt_ms: f64,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Parse the cache file: one `<host>\t<unix_seconds>\t<rtt_ms>` record per
/// line. Garbled lines are dropped rather than failing the whole load.
fn parse_cache(content: &str, max_age: Duration, now: u64) -> HashMap<String, CacheEntry> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let mut parts = line.split('\t');
        let (Some(host), Some(recorded_at), Some(rtt_ms)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let (Ok(recorded_at), Ok(rtt_ms)) = (recorded_at.parse::<u64>(), rtt_ms.parse::<f64>())
        else {
            continue;
        };
        if now.saturating_sub(recorded_at) > max_age.as_secs() {
            continue;
        }
        map.insert(host.to_string(), CacheEntry { recorded_at, rtt_ms });
    }
    map
}

fn load_cache(path: &Path, max_age: Duration) -> HashMap<String, CacheEntry> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_cache(&content, max_age, now_unix()),
        Err(_) => HashMap::new(),
    }
}

/// Rewrite the cache file atomically (temp file + rename). Stale/garbled
/// entries for hosts no longer probed are dropped; valid non-stale entries
/// for hosts absent from this run's mirror list are preserved.
fn save_cache(
    path: &Path,
    existing: &HashMap<String, CacheEntry>,
    fresh: &HashMap<String, f64>,
    now: u64,
) -> Result<()> {
    let mut merged = existing.clone();
    for (host, rtt_ms) in fresh {
        merged.insert(
            host.clone(),
            CacheEntry {
                recorded_at: now,
                rtt_ms: *rtt_ms,
            },
        );
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("fastestmirror.cache")
    ));

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        for (host, entry) in &merged {
            writeln!(file, "{}\t{}\t{}", host, entry.recorded_at, entry.rtt_ms)?;
        }
        file.flush()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

async fn probe_one(host: &str, timeout: Duration) -> Option<Duration> {
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(host)).await {
        Ok(Ok(_)) => Some(start.elapsed()),
        _ => None,
    }
}

/// Run the probe-and-reorder protocol. `emit` is invoked for
/// each stage transition (the `fastestmirrorcb` callback).
pub async fn run(
    list: &mut MirrorList,
    cache_path: Option<&Path>,
    max_age: Duration,
    probe_timeout: Duration,
    mut emit: impl FnMut(FastestMirrorStage),
) -> Result<()> {
    emit(FastestMirrorStage::Init);

    let now = now_unix();
    let cache = cache_path.map_or_else(HashMap::new, |p| load_cache(p, max_age));
    emit(FastestMirrorStage::CacheLoading);
    emit(FastestMirrorStage::CacheLoadingStatus);

    let mut candidates = Vec::new();
    // A single mirror has nothing to be ranked against; skip the probe
    // entirely rather than fire `Detection` for a list of one (spec §8
    // boundary: "fastest_mirror=true with only one mirror skips probing").
    if list.len() > 1 {
        for idx in 0..list.len() {
            let Some(mirror) = list.get(idx) else { continue };
            let Some(host) = mirror.host() else { continue };
            if let Some(entry) = cache.get(&host) {
                if let Some(m) = list.get_mut(idx) {
                    m.measured_rtt_ms = Some(entry.rtt_ms);
                }
            } else {
                candidates.push((idx, host));
            }
        }
    }

    let mut fresh = HashMap::new();
    if !candidates.is_empty() {
        emit(FastestMirrorStage::Detection {
            candidates: candidates.len(),
        });

        let probes = candidates.iter().map(|(_, host)| {
            let host = host.clone();
            async move {
                let rtt = probe_one(&host, probe_timeout).await;
                (host, rtt)
            }
        });
        let results: Vec<_> = futures::future::join_all(probes).await;

        for ((idx, _), (host, rtt)) in candidates.iter().zip(results) {
            let rtt_ms = rtt.map_or(f64::INFINITY, |d| d.as_secs_f64() * 1000.0);
            if rtt_ms.is_finite() {
                fresh.insert(host, rtt_ms);
            }
            if let Some(m) = list.get_mut(*idx) {
                m.measured_rtt_ms = Some(rtt_ms);
            }
        }
    }

    emit(FastestMirrorStage::Finishing);
    list.sort_by_latency();
    emit(FastestMirrorStage::Status);

    if let Some(path) = cache_path {
        save_cache(path, &cache, &fresh, now)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::types::Mirror;

    #[tokio::test]
    async fn lone_mirror_skips_detection_stage_without_cache() {
        let mut list = MirrorList::new(vec![Mirror::new("http://127.0.0.1:1/", 0)]);
        let mut stages = Vec::new();
        run(
            &mut list,
            None,
            Duration::from_secs(3600),
            Duration::from_millis(50),
            |s| stages.push(s),
        )
        .await
        .unwrap();
        assert!(
            !stages
                .iter()
                .any(|s| matches!(s, FastestMirrorStage::Detection { .. }))
        );
    }

    #[test]
    fn cache_parse_drops_stale_and_garbled_entries() {
        let now = 1_000_000u64;
        let content = format!(
            "good.example\t{}\t12.5\nstale.example\t{}\t99.0\ngarbled line here\n",
            now - 10,
            now - 10_000
        );
        let map = parse_cache(&content, Duration::from_secs(100), now);
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("good.example"));
    }

    #[tokio::test]
    async fn single_mirror_skips_detection_stage() {
        let mut list = MirrorList::new(vec![Mirror::new("http://127.0.0.1:1/", 0)]);
        let mut stages = Vec::new();
        // Pre-seed the host as cached so there are zero candidates.
        let cache_dir = tempfile::tempdir().unwrap();
        let cache_path = cache_dir.path().join("cache");
        std::fs::write(
            &cache_path,
            format!("127.0.0.1:1\t{}\t5.0\n", now_unix()),
        )
        .unwrap();
        run(
            &mut list,
            Some(&cache_path),
            Duration::from_secs(3600),
            Duration::from_millis(50),
            |s| stages.push(s),
        )
        .await
        .unwrap();
        assert!(
            !stages
                .iter()
                .any(|s| matches!(s, FastestMirrorStage::Detection { .. }))
        );
    }

    #[test]
    fn save_cache_is_atomic_and_merges_unseen_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");
        let mut existing = HashMap::new();
        existing.insert(
            "kept.example".to_string(),
            CacheEntry {
                recorded_at: now_unix(),
                rtt_ms: 3.0,
            },
        );
        let mut fresh = HashMap::new();
        fresh.insert("new.example".to_string(), 7.0);
        save_cache(&path, &existing, &fresh, now_unix()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("kept.example"));
        assert!(content.contains("new.example"));
    }
}
