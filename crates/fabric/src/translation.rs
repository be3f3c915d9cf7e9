use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use {
    sha2::{Digest, Sha256},
    tokio::time::{Duration, Instant},
    tracing::debug,
};

use crate::channel::ChannelProtocol;

/// A memoized transcoding between two channel protocols.
#[derive(Debug, Clone)]
pub struct TranslationEntry {
    pub source_content: String,
    pub translated: String,
    pub source: ChannelProtocol,
    pub target: ChannelProtocol,
    pub confidence: f64,
    inserted_at: Instant,
}

/// Memoizes protocol transcodings, keyed by a hash of
/// (content, source, target). Entries expire by age alone — a fixed TTL,
/// no LRU pressure.
pub struct TranslationCache {
    entries: Mutex<HashMap<[u8; 32], TranslationEntry>>,
    ttl: Duration,
}

impl TranslationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Transcode `content` from `source` to `target` protocol framing.
    ///
    /// Returns the entry and whether it was served from cache.
    pub fn translate(
        &self,
        content: &str,
        source: ChannelProtocol,
        target: ChannelProtocol,
    ) -> (TranslationEntry, bool) {
        let key = cache_key(content, source, target);
        let now = Instant::now();

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, e| now.duration_since(e.inserted_at) <= self.ttl);

        if let Some(hit) = entries.get(&key) {
            debug!(source = source.tag(), target = target.tag(), "translation cache hit");
            return (hit.clone(), true);
        }

        let entry = TranslationEntry {
            source_content: content.to_string(),
            translated: transcode(content, source, target),
            source,
            target,
            confidence: if source == target { 1.0 } else { 0.9 },
            inserted_at: now,
        };
        entries.insert(key, entry.clone());
        (entry, false)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Protocol prefix mapping: strip the source protocol's framing prefix if
/// present, then apply the target's.
fn transcode(content: &str, source: ChannelProtocol, target: ChannelProtocol) -> String {
    let source_prefix = format!("[{}] ", source.tag());
    let body = content.strip_prefix(&source_prefix).unwrap_or(content);
    format!("[{}] {}", target.tag(), body)
}

fn cache_key(content: &str, source: ChannelProtocol, target: ChannelProtocol) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update([0]);
    hasher.update(source.tag().as_bytes());
    hasher.update([0]);
    hasher.update(target.tag().as_bytes());
    hasher.finalize().into()
}
