//! Chat resolution with retry, multi-format fallback and a TTL cache.
//!
//! Every lookup of a watched chat goes through `EntityCache::resolve`. A hit
//! costs no I/O; a miss walks `ids::resolution_variants` once per round, with a
//! linear backoff between rounds.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::ChatHandle,
    errors::Error,
    ids::resolution_variants,
    ports::ChatResolver,
    Result,
};

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct CacheEntry {
    handle: ChatHandle,
    fetched_at: Instant,
}

pub struct EntityCache {
    resolver: Arc<dyn ChatResolver>,
    ttl: Duration,
    max_retries: u32,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl EntityCache {
    pub fn new(resolver: Arc<dyn ChatResolver>) -> Self {
        Self::with_settings(resolver, DEFAULT_TTL, DEFAULT_MAX_RETRIES)
    }

    pub fn with_settings(resolver: Arc<dyn ChatResolver>, ttl: Duration, max_retries: u32) -> Self {
        Self {
            resolver,
            ttl,
            max_retries: max_retries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, chat_id: &str) -> Result<ChatHandle> {
        self.resolve_with_retries(chat_id, self.max_retries).await
    }

    /// Resolve `chat_id`, trying every id variant per round for `max_retries` rounds.
    ///
    /// On success the handle is cached under `chat_id` as given, whichever
    /// variant actually resolved. On exhaustion returns `Error::Unreachable`
    /// with the last resolver failure.
    pub async fn resolve_with_retries(&self, chat_id: &str, max_retries: u32) -> Result<ChatHandle> {
        if let Some(handle) = self.get_cached(chat_id).await {
            tracing::debug!(chat_id, "using cached chat handle");
            return Ok(handle);
        }

        let variants = resolution_variants(chat_id);
        let rounds = max_retries.max(1);
        let mut last_error = String::from("no attempts made");

        for round in 0..rounds {
            for variant in &variants {
                match self.resolver.resolve(variant).await {
                    Ok(handle) => {
                        self.set_cached(chat_id, handle.clone()).await;
                        tracing::info!(chat_id, %variant, "resolved chat");
                        return Ok(handle);
                    }
                    Err(e) => {
                        tracing::warn!(chat_id, %variant, error = %e, "chat resolution attempt failed");
                        last_error = e.to_string();
                    }
                }
            }

            if round + 1 < rounds {
                let delay = BACKOFF_STEP * (round + 1);
                tracing::info!(chat_id, delay_secs = delay.as_secs(), "waiting before next resolution round");
                sleep(delay).await;
            }
        }

        tracing::error!(chat_id, rounds, error = %last_error, "chat unreachable");
        Err(Error::Unreachable {
            chat_id: chat_id.to_string(),
            rounds,
            last: last_error,
        })
    }

    /// Drop the cached handle for `chat_id` (exact key).
    pub async fn invalidate(&self, chat_id: &str) -> bool {
        self.entries.lock().await.remove(chat_id).is_some()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    async fn get_cached(&self, chat_id: &str) -> Option<ChatHandle> {
        let now = Instant::now();
        let map = self.entries.lock().await;
        map.get(chat_id)
            .filter(|e| now.duration_since(e.fetched_at) < self.ttl)
            .map(|e| e.handle.clone())
    }

    async fn set_cached(&self, chat_id: &str, handle: ChatHandle) {
        self.entries.lock().await.insert(
            chat_id.to_string(),
            CacheEntry {
                handle,
                fetched_at: Instant::now(),
            },
        );
    }
}
