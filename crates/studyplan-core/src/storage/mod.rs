//! Device-local key-value persistence.
//!
//! This module defines the `KeyValueStore` trait that every service in the
//! crate persists through, plus two implementations:
//! - `MemoryStore`: process-local map, used for tests and throwaway sessions
//! - `FileStore`: one JSON file per key inside the cache directory
//!
//! Keys follow the `namespace:scope` convention (`settings_cache:<user_id>`,
//! `pending_changes:<user_id>`, `navigation_state:<namespace>`), so several
//! users on one device never share an entry.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt entry for '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize entry for '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Async string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Remove several keys. Default implementation removes them one by one
    /// and stops at the first failure.
    async fn multi_remove(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.remove_item(key).await?;
        }
        Ok(())
    }
}

/// Read and deserialize a JSON entry.
///
/// A missing key is `Ok(None)`. A present but unparsable entry is
/// `StorageError::Corrupt`; callers decide whether to discard it.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(contents) = store.get_item(key).await? else {
        return Ok(None);
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StorageError::Corrupt {
            key: key.to_string(),
            source,
        })
}

/// Serialize and write a JSON entry.
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let contents = serde_json::to_string(value).map_err(|source| StorageError::Serialize {
        key: key.to_string(),
        source,
    })?;
    store.set_item(key, &contents).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_json_helpers_round_trip_through_store() {
        let store = MemoryStore::new();
        let sample = Sample {
            name: "calculus".to_string(),
            count: 3,
        };

        save_json(&store, "sample:1", &sample).await.unwrap();
        let loaded: Option<Sample> = load_json(&store, "sample:1").await.unwrap();
        assert_eq!(loaded, Some(sample));
    }

    #[tokio::test]
    async fn test_load_json_missing_key_is_none() {
        let store = MemoryStore::new();
        let loaded: Option<Sample> = load_json(&store, "missing").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_json_reports_corrupt_entry() {
        let store = MemoryStore::new();
        store.set_item("sample:1", "{not json").await.unwrap();

        let err = load_json::<Sample>(&store, "sample:1").await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { ref key, .. } if key == "sample:1"));
    }

    #[tokio::test]
    async fn test_multi_remove_clears_every_key() {
        let store = MemoryStore::new();
        store.set_item("a", "1").await.unwrap();
        store.set_item("b", "2").await.unwrap();

        store
            .multi_remove(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert!(store.get_item("a").await.unwrap().is_none());
        assert!(store.get_item("b").await.unwrap().is_none());
    }
}
