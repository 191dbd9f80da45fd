use std::collections::HashMap;
use std::sync::RwLock;

/// Process-local map from chunk SHA-256 to its embedding.
///
/// Entries never change once written (re-embedding the same content yields
/// the same vector), only accumulate, and the whole cache may be discarded
/// at any time without correctness loss. It is owned by the ingestion
/// coordinator rather than living in a global so tests and tenants stay
/// isolated.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sha256: &str) -> Option<Vec<f32>> {
        self.entries
            .read()
            .ok()
            .and_then(|map| map.get(sha256).cloned())
    }

    pub fn contains(&self, sha256: &str) -> bool {
        self.entries
            .read()
            .is_ok_and(|map| map.contains_key(sha256))
    }

    /// Idempotent insert; concurrent writers race to store identical values.
    pub fn insert(&self, sha256: impl Into<String>, embedding: Vec<f32>) {
        if let Ok(mut map) = self.entries.write() {
            map.insert(sha256.into(), embedding);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let cache = EmbeddingCache::new();
        assert!(cache.get("abc").is_none());
        cache.insert("abc", vec![0.1, 0.2]);
        assert_eq!(cache.get("abc"), Some(vec![0.1, 0.2]));
        assert!(cache.contains("abc"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reinsert_is_idempotent() {
        let cache = EmbeddingCache::new();
        cache.insert("abc", vec![1.0]);
        cache.insert("abc", vec![1.0]);
        assert_eq!(cache.len(), 1);
    }
}
