// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Tunnistin - Probe Cache
 * Fingerprint-keyed memo of idempotent request/response pairs with TTL
 * expiry, oldest-entry eviction and per-target invalidation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use md5::{Digest, Md5};
use parking_lot::RwLock;
use tracing::debug;

use crate::rules::model::RuleRequest;
use crate::str_utils::remove_trailing_slash;
use crate::types::{HttpRequest, HttpResponse};

const DEFAULT_MAX_SIZE: usize = 2048;
const DEFAULT_TTL: Duration = Duration::from_secs(600);
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Large record fields are truncated to this before an entry is stored.
const MAX_CACHED_FIELD: usize = 1 << 20;

const INVALIDATION_METHODS: &[&str] = &["GET", "POST", "HEAD", "PUT", "DELETE", "OPTIONS"];

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub max_size: usize,
    pub ttl_secs: u64,
}

/// Process-wide request/response memo guarded by a single reader-writer
/// lock. Writers hold the lock only for the map update.
pub struct ProbeCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_size: usize,
    ttl: Duration,
}

impl Default for ProbeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeCache {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_TTL, DEFAULT_MAX_SIZE)
    }

    pub fn with_config(ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(max_size.min(DEFAULT_MAX_SIZE))),
            max_size,
            ttl,
        }
    }

    /// `md5("{url}:{METHOD}:{follow_redirects}")` with the trailing slash
    /// of the URL dropped.
    pub fn cache_key(url: &str, method: &str, follow_redirects: bool) -> String {
        let normalized = format!(
            "{}:{}:{}",
            remove_trailing_slash(url),
            method.to_uppercase(),
            follow_redirects
        );
        let mut hasher = Md5::new();
        hasher.update(normalized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Read-side cacheability plus lookup: HTTP-typed rule requests with
    /// empty headers and body using GET or POST may reuse a cached probe.
    /// Entries past TTL are never returned; they are dropped by a
    /// background task instead of upgrading the read lock.
    pub fn lookup(self: &Arc<Self>, rule: &RuleRequest, url: &str) -> Option<CacheEntry> {
        if !rule.is_http() || url.is_empty() {
            return None;
        }
        let method = rule.method_or_get();
        if !rule.headers.is_empty() || !rule.body.is_empty() {
            return None;
        }
        if method != "GET" && method != "POST" {
            return None;
        }

        let key = Self::cache_key(url, &method, rule.follow_redirects);
        debug!(
            "cache lookup key={} {} {} follow={}",
            key, url, method, rule.follow_redirects
        );

        let entry = self.entries.read().get(&key).cloned()?;
        if self.is_fresh(&entry) {
            return Some(entry);
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.entries.write().remove(&key);
        });
        None
    }

    /// Write-side cacheability plus store: empty-bodied GET/POST probes
    /// are memoised with large fields truncated. Evicts the oldest entry
    /// when the cache is full.
    pub fn store(&self, url: &str, follow_redirects: bool, request: &HttpRequest, response: &HttpResponse) {
        if url.is_empty() {
            return;
        }
        let method = request.method.to_uppercase();
        if !request.body.is_empty() || (method != "GET" && method != "POST") {
            return;
        }

        let key = Self::cache_key(url, &method, follow_redirects);
        let mut request = request.clone();
        let mut response = response.clone();
        truncate_field(&mut request.body);
        truncate_field(&mut request.raw);
        truncate_field(&mut request.raw_header);
        truncate_field(&mut response.body);
        truncate_field(&mut response.raw);
        truncate_field(&mut response.raw_header);

        let entry = CacheEntry {
            request,
            response,
            timestamp: now_unix(),
        };

        let mut entries = self.entries.write();
        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            evict_oldest(&mut entries);
        }
        entries.insert(key, entry);
    }

    /// Drop every cached probe for a finished target across all methods
    /// and redirect flags, bounding long-tail residency.
    pub fn invalidate_target(&self, url: &str) {
        if url.is_empty() {
            return;
        }
        let mut keys = Vec::with_capacity(INVALIDATION_METHODS.len() * 2);
        for method in INVALIDATION_METHODS {
            for follow in [true, false] {
                keys.push(Self::cache_key(url, method, follow));
            }
        }
        let mut entries = self.entries.write();
        let mut dropped = 0;
        for key in keys {
            if entries.remove(&key).is_some() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("invalidated {} cache entries for {}", dropped, url);
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Remove TTL-expired entries. Called on a 5-minute tick.
    pub fn sweep(&self) -> usize {
        let now = now_unix();
        let ttl = self.ttl.as_secs() as i64;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| now - e.timestamp <= ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!("cache sweep removed {} expired entries", removed);
        }
        removed
    }

    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.tick().await;
            loop {
                tick.tick().await;
                this.sweep();
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_entries: self.entries.read().len(),
            max_size: self.max_size,
            ttl_secs: self.ttl.as_secs(),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        now_unix() - entry.timestamp <= self.ttl.as_secs() as i64
    }
}

fn truncate_field(field: &mut Vec<u8>) {
    if field.len() > MAX_CACHED_FIELD {
        field.truncate(MAX_CACHED_FIELD);
    }
}

fn evict_oldest(entries: &mut HashMap<String, CacheEntry>) {
    if let Some(key) = entries
        .iter()
        .min_by_key(|(_, e)| e.timestamp)
        .map(|(k, _)| k.clone())
    {
        debug!("evicting oldest cache entry {}", key);
        entries.remove(&key);
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
