use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::PropertyMap;
use crate::utils::path::normalize_path;

/// Persisted per-user dead properties, keyed by normalized path
#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn get_properties(&self, user: &str, path: &str) -> Result<PropertyMap>;

    async fn set_property(
        &self,
        user: &str,
        path: &str,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()>;

    /// Re-key the properties stored for exactly `from` to `to`.
    ///
    /// Only the exact path is rewritten; entries of descendants keep their
    /// old keys. Returns the number of rewritten entries.
    async fn rename_path(&self, user: &str, from: &str, to: &str) -> Result<u64>;

    /// Drop all properties stored for `path`
    async fn remove_path(&self, user: &str, path: &str) -> Result<u64>;
}

#[derive(Debug, Default)]
pub struct MemoryPropertyStore {
    properties: RwLock<HashMap<(String, String), PropertyMap>>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(user: &str, path: &str) -> (String, String) {
        (user.to_string(), normalize_path(path))
    }
}

#[async_trait]
impl PropertyStore for MemoryPropertyStore {
    async fn get_properties(&self, user: &str, path: &str) -> Result<PropertyMap> {
        Ok(self
            .properties
            .read()
            .await
            .get(&Self::key(user, path))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_property(
        &self,
        user: &str,
        path: &str,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        self.properties
            .write()
            .await
            .entry(Self::key(user, path))
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }

    async fn rename_path(&self, user: &str, from: &str, to: &str) -> Result<u64> {
        let mut properties = self.properties.write().await;
        match properties.remove(&Self::key(user, from)) {
            Some(props) => {
                properties.insert(Self::key(user, to), props);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn remove_path(&self, user: &str, path: &str) -> Result<u64> {
        Ok(self
            .properties
            .write()
            .await
            .remove(&Self::key(user, path))
            .map(|_| 1)
            .unwrap_or(0))
    }
}
