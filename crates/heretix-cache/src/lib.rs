//! Content-addressed, TTL-bounded on-disk cache for RPL samples.
//!
//! Grounded on `heretix/cache.py`'s `TTLCache`, `make_cache_key`, and
//! `make_run_cache_key`: cache keys are SHA-256 hashes of a versioned,
//! pipe-delimited identity string so that two runs with identical claim,
//! template, replicate, provider, model, and seed always land on the same
//! cache entry regardless of call order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use heretix_types::{CachedSample, Sample};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CACHE_KEY_VERSION: &str = "v1";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache entry: {0}")]
    Read(#[source] std::io::Error),
    #[error("failed to write cache entry: {0}")]
    Write(#[source] std::io::Error),
    #[error("cached entry is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),
}

/// Builds the cache key for one (claim, template, replicate) draw.
///
/// Deliberately independent of `K`/`R`/`B`/seed: per spec, a sample's
/// identity is `(claim, logical_model, prompt_version, prompt_sha256,
/// replicate_idx, max_output_tokens, provider_mode)`. `template_hash` here
/// stands in for `prompt_sha256` (the rendered template is already the full
/// prompt modulo claim substitution). Keeping bootstrap parameters out of
/// this key means a single sample draw is reusable across runs that ask
/// for a different `B` or a different explicit seed against the same
/// claim/template/replicate.
#[allow(clippy::too_many_arguments)]
pub fn make_cache_key(
    claim: &str,
    model: &str,
    prompt_version: &str,
    template_hash: &str,
    replicate_idx: u32,
    max_output_tokens: u32,
    provider: &str,
    provider_mode: &str,
) -> String {
    let identity = format!(
        "{CACHE_KEY_VERSION}|{}|{model}|{prompt_version}|{template_hash}|{replicate_idx}|{max_output_tokens}|{provider}|{provider_mode}",
        claim.trim()
    );
    hex_sha256(identity.as_bytes())
}

/// Builds the cache key for a whole run's aggregate artifact (used to key
/// the run-level [`heretix_lock::FileLock`] and artifact directory).
pub fn make_run_cache_key(claim: &str, provider: &str, model: &str, seed: u64) -> String {
    let identity = format!("{CACHE_KEY_VERSION}|run|{}|{provider}|{model}|{seed}", claim.trim());
    hex_sha256(identity.as_bytes())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut s = String::with_capacity(digest.len() * 2);
    use std::fmt::Write;
    for b in digest {
        write!(s, "{:02x}", b).expect("writing to String cannot fail");
    }
    s
}

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 { 0.0 } else { hits / total }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// A directory-backed cache of [`Sample`]s, keyed by content hash.
pub struct SampleCache {
    root: PathBuf,
    ttl: Duration,
    stats: CacheStats,
}

impl SampleCache {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self { root: root.into(), ttl, stats: CacheStats::default() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Two-level sharding keeps any one directory from growing unbounded.
        self.root.join(&key[0..2]).join(format!("{key}.json"))
    }

    pub fn get(&self, key: &str) -> Result<Option<Sample>, CacheError> {
        let path = self.path_for(key);
        if !path.exists() {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path).map_err(CacheError::Read)?;
        let cached: CachedSample = serde_json::from_str(&raw).map_err(CacheError::Corrupt)?;

        let age_ms = Utc::now().timestamp_millis() - cached.created_at_unix_ms;
        if age_ms < 0 || age_ms as u64 > self.ttl.as_millis() as u64 {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(cached.sample))
    }

    pub fn put(&self, key: &str, sample: &Sample) -> Result<(), CacheError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(CacheError::Write)?;
        }
        let cached = CachedSample {
            cache_key: key.to_string(),
            sample: sample.clone(),
            created_at_unix_ms: Utc::now().timestamp_millis(),
        };
        let json = serde_json::to_string(&cached).map_err(CacheError::Corrupt)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(CacheError::Write)?;
        std::fs::rename(&tmp, &path).map_err(CacheError::Write)?;
        Ok(())
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
