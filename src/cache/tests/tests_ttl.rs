#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use crate::cache::{Cache, EvictionPolicy};
    use crate::config::CacheConfig;

    fn cache_with_default_ttl(ttl_ms: u64) -> Cache {
        Cache::new(&CacheConfig {
            max_entries: 100,
            policy: EvictionPolicy::Lru,
            eviction_factor: 0.1,
            default_ttl_ms: ttl_ms,
        })
    }

    #[test]
    fn zero_ttl_means_permanent() {
        let c = cache_with_default_ttl(0);
        c.set(b"k".to_vec(), b"v".to_vec());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(c.get(b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn expired_entry_is_lazily_removed_on_get() {
        let c = cache_with_default_ttl(0);
        c.set_with_ttl(b"k".to_vec(), b"v".to_vec(), 20);
        assert_eq!(c.get(b"k"), Some(b"v".to_vec()));

        thread::sleep(Duration::from_millis(40));
        assert_eq!(c.get(b"k"), None, "past-TTL entry must not be retrievable");
        assert_eq!(c.len(), 0, "lazy expiry removes the entry");
        assert_eq!(c.stats().expirations, 1);
        assert!(c.validate_integrity());
    }

    #[test]
    fn exists_also_expires_lazily() {
        let c = cache_with_default_ttl(0);
        c.set_with_ttl(b"k".to_vec(), b"v".to_vec(), 20);
        assert!(c.exists(b"k"));

        thread::sleep(Duration::from_millis(40));
        assert!(!c.exists(b"k"));
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn sweep_removes_expired_without_touching_live() {
        let c = cache_with_default_ttl(0);
        c.set_with_ttl(b"dies".to_vec(), b"v".to_vec(), 20);
        c.set_with_ttl(b"lives".to_vec(), b"v".to_vec(), 60_000);
        c.set(b"forever".to_vec(), b"v".to_vec());

        thread::sleep(Duration::from_millis(40));
        assert_eq!(c.sweep_expired(), 1);
        assert!(!c.exists(b"dies"));
        assert!(c.exists(b"lives"));
        assert!(c.exists(b"forever"));
        assert!(c.validate_integrity());
    }

    #[test]
    fn default_ttl_applies_to_plain_set() {
        let c = cache_with_default_ttl(20);
        c.set(b"k".to_vec(), b"v".to_vec());
        thread::sleep(Duration::from_millis(40));
        assert_eq!(c.get(b"k"), None);
    }
}
