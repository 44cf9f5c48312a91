use std::collections::{HashSet, VecDeque};

use sdfcom_types::{DEDUP_CAPACITY, DEDUP_RETAIN};

/// Bounded set of recently seen `username:content` keys.
///
/// Once more than `capacity` keys are held, the oldest keys are dropped until
/// only the `retain` most recently inserted remain.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
    retain: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize, retain: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            capacity,
            retain: retain.min(capacity),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Insert a key; returns false if it was already present
    pub fn insert(&mut self, key: String) -> bool {
        if self.seen.contains(&key) {
            return false;
        }

        self.seen.insert(key.clone());
        self.order.push_back(key);

        if self.order.len() > self.capacity {
            while self.order.len() > self.retain {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEDUP_CAPACITY, DEDUP_RETAIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_rejected() {
        let mut window = DedupWindow::default();
        assert!(window.insert("alice:hi".to_string()));
        assert!(!window.insert("alice:hi".to_string()));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_trim_keeps_most_recent() {
        let mut window = DedupWindow::new(10, 5);
        for i in 0..11 {
            window.insert(format!("user:{}", i));
        }

        assert_eq!(window.len(), 5);
        for i in 0..6 {
            assert!(!window.contains(&format!("user:{}", i)));
        }
        for i in 6..11 {
            assert!(window.contains(&format!("user:{}", i)));
        }
    }

    #[test]
    fn test_trimmed_key_can_be_emitted_again() {
        let mut window = DedupWindow::new(2, 1);
        window.insert("a:1".to_string());
        window.insert("a:2".to_string());
        window.insert("a:3".to_string());
        assert!(window.insert("a:1".to_string()));
    }
}
