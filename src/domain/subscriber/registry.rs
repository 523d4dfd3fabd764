//! In-memory subscriber registry

use super::SubscriberRegistry;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Registry held in process memory, keyed by subscriber then field
#[derive(Default)]
pub struct InMemorySubscriberRegistry {
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemorySubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a subscriber field directly
    pub async fn provision(&self, key: &str, field: &str, value: &str) {
        self.entries
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }
}

#[async_trait::async_trait]
impl SubscriberRegistry for InMemorySubscriberRegistry {
    async fn lookup(&self, key: &str, field: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .get(key)
            .and_then(|fields| fields.get(field))
            .cloned()
    }

    async fn update(&self, key: &str, field: &str, value: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(fields) => {
                fields.insert(field.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }
}
