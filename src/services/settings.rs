use std::sync::Mutex;

use anyhow::Result;
use chrono::Duration;

use crate::models::GenerationConfig;
use crate::services::cache::TtlCache;
use crate::services::database::Database;

const ACTIVE_CONFIG_KEY: &str = "active_config";
const CONFIG_TTL_MINUTES: i64 = 5;

type ConfigListener = Box<dyn Fn(Option<&GenerationConfig>) + Send + Sync>;

/// Holds the active generation preset. Change notification goes through
/// explicit subscriptions rather than ambient events.
pub struct SettingsService {
    db: Database,
    cache: TtlCache<Option<GenerationConfig>>,
    listeners: Mutex<Vec<ConfigListener>>,
}

impl SettingsService {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: TtlCache::new(Duration::minutes(CONFIG_TTL_MINUTES)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback invoked whenever the active config changes.
    pub fn subscribe(&self, listener: ConfigListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub async fn active_config(&self) -> Result<Option<GenerationConfig>> {
        if let Some(cached) = self.cache.get(ACTIVE_CONFIG_KEY) {
            return Ok(cached);
        }
        let config = match self.db.get_setting(ACTIVE_CONFIG_KEY).await? {
            Some(json) => serde_json::from_str(&json).ok(),
            None => None,
        };
        self.cache.set(ACTIVE_CONFIG_KEY, config.clone());
        Ok(config)
    }

    pub async fn set_active_config(&self, config: Option<&GenerationConfig>) -> Result<()> {
        match config {
            Some(c) => {
                self.db
                    .set_setting(ACTIVE_CONFIG_KEY, &serde_json::to_string(c)?)
                    .await?
            }
            None => self.db.delete_setting(ACTIVE_CONFIG_KEY).await?,
        }
        self.cache.invalidate(ACTIVE_CONFIG_KEY);
        for listener in self.listeners.lock().unwrap().iter() {
            listener(config);
        }
        Ok(())
    }
}
