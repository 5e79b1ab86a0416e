use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Keyed cache with a fixed per-entry lifetime. Each consumer owns its
/// instance; there is no shared global state.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, (V, DateTime<Utc>)>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Fetch a live entry; an expired one is evicted on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().unwrap();
        let expired = match entries.get(key) {
            Some((value, stored_at)) => {
                if Utc::now() - *stored_at < self.ttl {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    pub fn set(&self, key: &str, value: V) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value, Utc::now()));
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}
