use std::sync::Mutex;

use chrono::Utc;

use super::{Link, LinkOutcome, LinkRegistry};
use crate::base::{EntityId, StorageId, StorageKind};
use crate::prelude::*;

type LinkKey = (StorageKind, StorageId, EntityId);

/// Process-local registry. Links live as long as the value does.
#[derive(Default)]
pub struct MemoryLinkRegistry {
    links: Mutex<BTreeMap<LinkKey, Link>>,
}

impl MemoryLinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<LinkKey, Link>> {
        self.links.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn of_storage<'a>(
        links: &'a BTreeMap<LinkKey, Link>,
        kind: &'a StorageKind,
        storage_id: StorageId,
    ) -> impl Iterator<Item = &'a Link> + 'a {
        links
            .values()
            .filter(move |link| &link.kind == kind && link.storage_id == storage_id)
    }
}

#[async_trait]
impl LinkRegistry for MemoryLinkRegistry {
    async fn create(
        &self,
        kind: &StorageKind,
        storage_id: StorageId,
        entity_id: EntityId,
        key: &str,
    ) -> Result<LinkOutcome> {
        let mut links = self.lock();
        let link_key = (kind.clone(), storage_id, entity_id);
        if links.contains_key(&link_key) {
            return Ok(LinkOutcome::AlreadyLinked);
        }
        let link = Link {
            kind: kind.clone(),
            storage_id,
            entity_id,
            key: key.to_string(),
            created_at: Utc::now(),
        };
        links.insert(link_key, link.clone());
        Ok(LinkOutcome::Created(link))
    }

    async fn linked_keys(
        &self,
        kind: &StorageKind,
        storage_id: StorageId,
    ) -> Result<HashSet<String>> {
        let links = self.lock();
        Ok(Self::of_storage(&links, kind, storage_id)
            .map(|link| link.key.clone())
            .collect())
    }

    async fn list(&self, kind: &StorageKind, storage_id: StorageId) -> Result<Vec<Link>> {
        let links = self.lock();
        Ok(Self::of_storage(&links, kind, storage_id).cloned().collect())
    }

    async fn delete_for_storage(&self, kind: &StorageKind, storage_id: StorageId) -> Result<u64> {
        let mut links = self.lock();
        let before = links.len();
        links.retain(|_, link| !(&link.kind == kind && link.storage_id == storage_id));
        Ok((before - links.len()) as u64)
    }

    async fn delete_for_entity(&self, entity_id: EntityId) -> Result<u64> {
        let mut links = self.lock();
        let before = links.len();
        links.retain(|_, link| link.entity_id != entity_id);
        Ok((before - links.len()) as u64)
    }

    async fn max_storage_id(&self) -> Result<Option<StorageId>> {
        Ok(self.lock().values().map(|link| link.storage_id).max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_link_is_reported_not_stored() -> Result<()> {
        let registry = MemoryLinkRegistry::new();
        let kind = StorageKind::export("couchdb");

        let first = registry.create(&kind, 1, 10, "10").await?;
        assert!(first.is_created());
        let second = registry.create(&kind, 1, 10, "10").await?;
        assert_eq!(second, LinkOutcome::AlreadyLinked);
        assert_eq!(registry.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn links_are_scoped_by_kind_and_storage() -> Result<()> {
        let registry = MemoryLinkRegistry::new();
        let import = StorageKind::import("couchdb");
        let export = StorageKind::export("couchdb");

        registry.create(&import, 1, 10, "a").await?;
        registry.create(&import, 2, 10, "b").await?;
        registry.create(&export, 1, 10, "c").await?;

        assert_eq!(
            registry.linked_keys(&import, 1).await?,
            HashSet::from(["a".to_string()])
        );
        assert_eq!(
            registry.linked_keys(&import, 2).await?,
            HashSet::from(["b".to_string()])
        );
        let exported = registry.list(&export, 1).await?;
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].key, "c");
        assert_eq!(exported[0].entity_id, 10);
        Ok(())
    }

    #[tokio::test]
    async fn max_storage_id_spans_kinds() -> Result<()> {
        let registry = MemoryLinkRegistry::new();
        assert_eq!(registry.max_storage_id().await?, None);

        registry.create(&StorageKind::import("couchdb"), 3, 10, "a").await?;
        registry.create(&StorageKind::export("couchdb"), 5, 10, "10").await?;
        assert_eq!(registry.max_storage_id().await?, Some(5));
        Ok(())
    }

    #[tokio::test]
    async fn cascade_deletes() -> Result<()> {
        let registry = MemoryLinkRegistry::new();
        let kind = StorageKind::import("couchdb");
        registry.create(&kind, 1, 10, "a").await?;
        registry.create(&kind, 1, 11, "b").await?;
        registry.create(&kind, 2, 11, "b").await?;

        assert_eq!(registry.delete_for_entity(11).await?, 2);
        assert_eq!(registry.list(&kind, 1).await?.len(), 1);

        assert_eq!(registry.delete_for_storage(&kind, 1).await?, 1);
        assert!(registry.is_empty());
        Ok(())
    }
}
