//! Short-lived session cache. Holds the most recent message per session
//! under a TTL so the session endpoint can answer without a database read.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{AttacheError, Result};

#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// `None` for a missing or expired key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn ping(&self) -> Result<()>;
}

/// Process-local cache. Expired entries are dropped lazily on read and
/// swept opportunistically on write.
#[derive(Default)]
pub struct MemorySessionCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let deadline = Instant::now() + ttl;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AttacheError::DependencyUnavailable("session cache poisoned".into()))?;
        let now = Instant::now();
        entries.retain(|_, (_, expiry)| *expiry > now);
        entries.insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let expired = {
            let entries = self.entries.read().map_err(|_| {
                AttacheError::DependencyUnavailable("session cache poisoned".into())
            })?;
            match entries.get(key) {
                Some((value, expiry)) if *expiry > Instant::now() => {
                    return Ok(Some(value.clone()))
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.entries.write().map_err(|_| {
                AttacheError::DependencyUnavailable("session cache poisoned".into())
            })?;
            entries.remove(key);
        }
        Ok(None)
    }

    async fn ping(&self) -> Result<()> {
        self.entries
            .read()
            .map(|_| ())
            .map_err(|_| AttacheError::DependencyUnavailable("session cache poisoned".into()))
    }
}

/// Cache key for a session's most recent message.
pub fn last_message_key(session_id: &str) -> String {
    format!("session:{session_id}:last_message")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_reads_back() {
        let cache = MemorySessionCache::new();
        cache
            .set_with_expiry("session:a:last_message", "hello", Duration::from_secs(60))
            .await
            .unwrap();
        let value = cache.get("session:a:last_message").await.unwrap();
        assert_eq!(value.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn expired_entries_vanish() {
        let cache = MemorySessionCache::new();
        cache
            .set_with_expiry("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let cache = MemorySessionCache::new();
        assert!(cache.get("absent").await.unwrap().is_none());
    }

    #[test]
    fn key_shape_is_stable() {
        assert_eq!(last_message_key("abc"), "session:abc:last_message");
    }
}
