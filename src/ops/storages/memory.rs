use std::sync::Mutex;

use crate::ops::interface::{KeyValueStore, RemoteRecord, Revision, into_document};
use crate::prelude::*;

const BACKEND: &str = "memory";

struct StoredDoc {
    generation: u64,
    payload: serde_json::Map<String, serde_json::Value>,
}

impl StoredDoc {
    fn revision(&self) -> Revision {
        Revision(format!("{}-mem", self.generation))
    }
}

/// In-process store with the same revision rules as a document database.
///
/// Keys are enumerated in lexicographic order from a snapshot taken when
/// [`keys`](KeyValueStore::keys) is called.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, StoredDoc>>,
    write_attempts: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_attempts(mut self, attempts: usize) -> Self {
        self.write_attempts = Some(attempts);
        self
    }

    /// Removes `key`, returning whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredDoc>> {
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get_record(&self, key: &str) -> Result<Option<RemoteRecord>> {
        Ok(self.lock().get(key).map(|doc| RemoteRecord {
            key: key.to_string(),
            revision: Some(doc.revision()),
            payload: doc.payload.clone(),
        }))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&Revision>,
        value: serde_json::Value,
    ) -> Result<Option<Revision>> {
        let payload = into_document(key, value)?;
        let mut docs = self.lock();
        let current = docs.get(key).map(StoredDoc::revision);
        if current.as_ref() != expected {
            return Err(Error::Conflict {
                key: key.to_string(),
            });
        }
        let generation = docs.get(key).map_or(1, |doc| doc.generation + 1);
        let doc = StoredDoc {
            generation,
            payload,
        };
        let revision = doc.revision();
        docs.insert(key.to_string(), doc);
        Ok(Some(revision))
    }

    fn write_attempts(&self) -> usize {
        self.write_attempts.unwrap_or(2)
    }

    fn keys(&self) -> BoxStream<'_, Result<String>> {
        let keys: Vec<String> = self.lock().keys().cloned().collect();
        futures::stream::iter(keys.into_iter().map(Ok)).boxed()
    }
}
