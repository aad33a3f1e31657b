//! Durable mapping between internal entities and the external keys they were
//! imported from or exported to.

use chrono::{DateTime, Utc};

use crate::base::{EntityId, StorageId, StorageKind};
use crate::prelude::*;
use crate::settings::Settings;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryLinkRegistry;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLinkRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub kind: StorageKind,
    pub storage_id: StorageId,
    pub entity_id: EntityId,
    pub key: String,
    pub created_at: DateTime<Utc>,
}

/// Result of recording a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Created(Link),
    /// A link for the same (kind, storage, entity) already exists; nothing
    /// was written.
    AlreadyLinked,
}

impl LinkOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, LinkOutcome::Created(_))
    }
}

/// Storage for [`Link`]s, unique on (kind, storage, entity).
///
/// Implementations must be safe to share between concurrent sync runs:
/// a duplicate insert yields [`LinkOutcome::AlreadyLinked`], never an error or
/// a second row.
#[async_trait]
pub trait LinkRegistry: Send + Sync {
    async fn create(
        &self,
        kind: &StorageKind,
        storage_id: StorageId,
        entity_id: EntityId,
        key: &str,
    ) -> Result<LinkOutcome>;

    /// Every key linked in this storage.
    async fn linked_keys(&self, kind: &StorageKind, storage_id: StorageId)
    -> Result<HashSet<String>>;

    async fn list(&self, kind: &StorageKind, storage_id: StorageId) -> Result<Vec<Link>>;

    /// Drops every link of a storage. Returns the number of links removed.
    async fn delete_for_storage(&self, kind: &StorageKind, storage_id: StorageId) -> Result<u64>;

    /// Drops every link of an entity across all storages.
    async fn delete_for_entity(&self, entity_id: EntityId) -> Result<u64>;

    /// Highest storage id holding any link, of any kind.
    async fn max_storage_id(&self) -> Result<Option<StorageId>>;
}

/// Opens the registry named by `settings`: Postgres when a registry URL is
/// set, otherwise a process-local one.
pub async fn open_registry(settings: &Settings) -> Result<Arc<dyn LinkRegistry>> {
    match settings.registry_url.as_deref() {
        #[cfg(feature = "postgres")]
        Some(url) => {
            let registry = PostgresLinkRegistry::connect(url, &settings.links_table).await?;
            registry.setup().await?;
            Ok(Arc::new(registry))
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => Err(Error::registry(
            "a registry URL is set but the `postgres` feature is disabled",
        )),
        None => {
            warn!("No registry URL configured, links will not outlive this process");
            Ok(Arc::new(MemoryLinkRegistry::new()))
        }
    }
}
