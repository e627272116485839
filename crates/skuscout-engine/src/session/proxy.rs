use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin over the configured egress proxies, shared by all workers.
#[derive(Debug, Default)]
pub struct ProxyPool {
    proxies: Vec<String>,
    cursor: AtomicUsize,
}

impl ProxyPool {
    #[must_use]
    pub fn new(proxies: Vec<String>) -> Self {
        Self {
            proxies,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next proxy in rotation, or `None` when running direct.
    pub fn next(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        self.proxies.get(index).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_runs_direct() {
        let pool = ProxyPool::new(Vec::new());
        assert!(pool.next().is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn rotates_round_robin() {
        let pool = ProxyPool::new(vec!["http://a:1".into(), "http://b:2".into()]);
        assert_eq!(pool.next().as_deref(), Some("http://a:1"));
        assert_eq!(pool.next().as_deref(), Some("http://b:2"));
        assert_eq!(pool.next().as_deref(), Some("http://a:1"));
    }
}
