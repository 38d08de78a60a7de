//! Cache-aside store for transcription results.
//!
//! Keyed by the SHA-256 of the raw audio bytes, so resubmitting the same
//! file completes instantly without occupying a worker slot.

use std::time::Duration;

use moka::sync::Cache;
use sha2::{Digest, Sha256};

use crate::render::TranscriptResult;

pub struct ResultCache {
    inner: Cache<String, TranscriptResult>,
}

impl ResultCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Hex SHA-256 of the audio content.
    pub fn key(audio: &[u8]) -> String {
        let digest = Sha256::digest(audio);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn get(&self, key: &str) -> Option<TranscriptResult> {
        let hit = self.inner.get(key);
        match &hit {
            Some(_) => log::info!("Cache HIT for content hash {}...", &key[..10.min(key.len())]),
            None => log::debug!("Cache MISS for content hash {}...", &key[..10.min(key.len())]),
        }
        hit
    }

    pub fn insert(&self, key: String, result: TranscriptResult) {
        self.inner.insert(key, result);
    }

    #[cfg(test)]
    pub fn len(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RawTranscript;
    use crate::render;

    fn sample() -> TranscriptResult {
        render::render("a.wav", RawTranscript {
            text: "cached".to_string(),
            segments: vec![],
            entities: vec![],
        })
    }

    #[test]
    fn key_is_stable_and_content_sensitive() {
        let a = ResultCache::key(b"same bytes");
        let b = ResultCache::key(b"same bytes");
        let c = ResultCache::key(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn round_trip() {
        let cache = ResultCache::new(16, Duration::from_secs(60));
        let key = ResultCache::key(b"audio");
        assert!(cache.get(&key).is_none());

        cache.insert(key.clone(), sample());
        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.raw_text, "cached");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entries_are_gone() {
        let cache = ResultCache::new(16, Duration::from_millis(20));
        let key = ResultCache::key(b"audio");
        cache.insert(key.clone(), sample());
        std::thread::sleep(Duration::from_millis(50));
        assert!(cache.get(&key).is_none());
    }
}
