//! Content-addressed cache for stage chain results.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use super::TransformOutput;

/// Stores the final output of a chain keyed by the chain identity and the
/// input content. Shared across runs so watch rebuilds skip unchanged inputs.
#[derive(Debug, Default)]
pub struct TransformCache {
    entries: Mutex<HashMap<String, TransformOutput>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl TransformCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache key over the rule, each stage's name and bound options, and the
    /// content.
    pub fn key<'a>(
        rule: &str,
        stages: impl IntoIterator<Item = (&'a str, String)>,
        content: &[u8],
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(rule.as_bytes());
        hasher.update([0]);
        for (name, fingerprint) in stages {
            hasher.update(name.as_bytes());
            hasher.update([b'(']);
            hasher.update(fingerprint.as_bytes());
            hasher.update([b')']);
        }
        hasher.update([0]);
        hasher.update(content);
        hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn get(&self, key: &str) -> Option<TransformOutput> {
        let found = self.entries.lock().ok().and_then(|entries| entries.get(key).cloned());
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn insert(&self, key: String, output: TransformOutput) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, output);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_depends_on_every_part() {
        let base = TransformCache::key("rule-0", [("script", String::new())], b"a");
        assert_eq!(base, TransformCache::key("rule-0", [("script", String::new())], b"a"));
        assert_ne!(base, TransformCache::key("rule-1", [("script", String::new())], b"a"));
        assert_ne!(base, TransformCache::key("rule-0", [("script", "x".to_string())], b"a"));
        assert_ne!(base, TransformCache::key("rule-0", [("script", String::new())], b"b"));
    }

    #[test]
    fn test_hits_and_misses() {
        let cache = TransformCache::new();
        assert!(cache.get("k").is_none());
        cache.insert("k".to_string(), TransformOutput::code("x"));
        assert_eq!(cache.get("k"), Some(TransformOutput::code("x")));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.len(), 1);
    }
}
