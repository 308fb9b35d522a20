//! Bounded recency set of recently dispatched task hashes.
//!
//! The hot set only decides whether the durable cache is worth consulting.
//! Evicting a hash here never deletes the persisted cache entry; those expire
//! by TTL on their own.

use indexmap::IndexSet;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct RecentHashes {
    capacity: usize,
    order: IndexSet<String>,
}

impl RecentHashes {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: IndexSet::new(),
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.order.contains(hash)
    }

    /// Mark `hash` most recently used. Returns the evicted hash, if any.
    pub fn touch(&mut self, hash: &str) -> Option<String> {
        self.order.shift_remove(hash);
        self.order.insert(hash.to_string());
        if self.order.len() > self.capacity {
            return self.order.shift_remove_index(0);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for RecentHashes {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_recently_used_hash_is_evicted() {
        let mut recent = RecentHashes::new(2);
        assert_eq!(recent.touch("a"), None);
        assert_eq!(recent.touch("b"), None);
        // refresh "a" so "b" becomes the oldest
        assert_eq!(recent.touch("a"), None);
        assert_eq!(recent.touch("c"), Some("b".to_string()));
        assert!(recent.contains("a"));
        assert!(recent.contains("c"));
        assert!(!recent.contains("b"));
        assert_eq!(recent.len(), 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut recent = RecentHashes::new(0);
        recent.touch("a");
        assert_eq!(recent.touch("b"), Some("a".to_string()));
        assert_eq!(recent.len(), 1);
    }
}
