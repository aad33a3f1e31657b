//! Capability interface shared by every remote store backend.

use crate::prelude::*;

use crate::settings::StorageConfig;

/// Opaque version token of a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub String);

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as read from the remote store.
///
/// `payload` never contains the store's bookkeeping fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub key: String,
    pub revision: Option<Revision>,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Keyed {scan, fetch, write} access to one remote collection.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short backend tag, used to namespace links (e.g. `couchdb`).
    fn backend(&self) -> &'static str;

    /// Cheap existence check of the configured collection.
    async fn ping(&self) -> Result<()>;

    /// Fetches the document at `key` with its current revision.
    /// Returns `None` when the key does not exist.
    async fn get_record(&self, key: &str) -> Result<Option<RemoteRecord>>;

    /// Fetches the payload at `key`. Returns `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .get_record(key)
            .await?
            .map(|record| serde_json::Value::Object(record.payload)))
    }

    /// Writes `value` at `key` only if the stored revision is still
    /// `expected` (`None` meaning "the key must not exist yet").
    /// Fails with [`Error::Conflict`] otherwise.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Revision>,
        value: serde_json::Value,
    ) -> Result<Option<Revision>>;

    /// Attempts of a conflicting [`set`](Self::set), the first one included.
    fn write_attempts(&self) -> usize {
        2
    }

    /// Creates or replaces the document at `key`.
    ///
    /// Reads the current revision and swaps against it; on conflict the
    /// revision is read again, up to [`write_attempts`](Self::write_attempts)
    /// times. Returns the new revision when known.
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<Option<Revision>> {
        let attempts = self.write_attempts().max(1);
        for attempt in 1..=attempts {
            let current = self.get_record(key).await?.and_then(|r| r.revision);
            match self.compare_and_swap(key, current.as_ref(), value.clone()).await {
                Err(Error::Conflict { .. }) if attempt < attempts => {
                    debug!("Revision conflict on `{key}` (attempt {attempt}/{attempts})");
                }
                result => return result,
            }
        }
        Err(Error::Conflict {
            key: key.to_string(),
        })
    }

    /// Lazily enumerates every key of the collection, each at most once.
    fn keys(&self) -> BoxStream<'_, Result<String>>;
}

/// Builds a live store session from a configuration.
pub trait StoreFactory: Send + Sync {
    fn connect(&self, config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>>;
}

impl<F> StoreFactory for F
where
    F: Fn(&StorageConfig) -> Result<Arc<dyn KeyValueStore>> + Send + Sync,
{
    fn connect(&self, config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>> {
        self(config)
    }
}

/// Checks that `value` is a JSON object and strips bookkeeping fields from it.
pub(crate) fn into_document(
    key: &str,
    value: serde_json::Value,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    match value {
        serde_json::Value::Object(mut map) => {
            map.remove("_id");
            map.remove("_rev");
            Ok(map)
        }
        other => Err(Error::validation(format!(
            "value for key `{key}` must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
