//! Per-project catalog of import and export storages.
//!
//! A storage is only ever stored after its connection parameters were proven
//! to work. Removing a storage drops its links and, for export storages, its
//! annotation-created handler.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::base::{EntityId, ProjectId, StorageId, StorageKind};
use crate::collaborator::{Annotation, AnnotationSerializer, TaskSink};
use crate::execution::{ExportDispatcher, ExportStorage, ImportStorage, SyncStats, SyncSummary};
use crate::links::LinkRegistry;
use crate::ops::interface::{KeyValueStore, StoreFactory};
use crate::prelude::*;
use crate::settings::StorageConfig;

/// User-facing text of a failed connection check.
pub const CONNECTION_CHECK_FAILED: &str = "Can't connect to remote store.";

/// Checks `config`, builds a store for it and pings it.
///
/// Structural problems with `config` are returned as is. Every connection
/// failure is reported as the same validation error; the cause only goes to
/// the log.
pub async fn validate_connection(
    factory: &dyn StoreFactory,
    config: &StorageConfig,
) -> Result<Arc<dyn KeyValueStore>> {
    config.check()?;
    let outcome = match factory.connect(config) {
        Ok(store) => match store.ping().await {
            Ok(()) => Ok(store),
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    };
    outcome.map_err(|err| {
        warn!(
            "Connection check against {} (db `{}`) failed: {err}",
            config.base_url(),
            config.db
        );
        Error::validation(CONNECTION_CHECK_FAILED)
    })
}

/// What a caller provides to create or update a storage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageParams {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub config: StorageConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageRecord {
    pub id: StorageId,
    pub project_id: ProjectId,
    pub kind: StorageKind,
    pub title: String,
    pub description: String,
    pub config: StorageConfig,
    pub last_sync: Option<SyncSummary>,
}

struct Entry<S> {
    record: StorageRecord,
    storage: Arc<S>,
}

type Entries<S> = Mutex<BTreeMap<StorageId, Entry<S>>>;

pub struct StorageCatalog<A: Annotation + 'static> {
    factory: Arc<dyn StoreFactory>,
    links: Arc<dyn LinkRegistry>,
    serializer: Arc<dyn AnnotationSerializer<A>>,
    dispatcher: Arc<ExportDispatcher<A>>,
    imports: Entries<ImportStorage>,
    exports: Entries<ExportStorage<A>>,
    next_id: AtomicI64,
}

fn lock<S>(entries: &Entries<S>) -> std::sync::MutexGuard<'_, BTreeMap<StorageId, Entry<S>>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unknown_storage(what: &str, id: StorageId) -> Error {
    Error::NotFound {
        key: format!("{what} storage {id}"),
    }
}

impl<A: Annotation + 'static> StorageCatalog<A> {
    /// Opens a catalog over `links`.
    ///
    /// Storage ids continue after the highest one the registry holds links
    /// for, so a new storage never inherits links left by an earlier one.
    pub async fn open(
        factory: Arc<dyn StoreFactory>,
        links: Arc<dyn LinkRegistry>,
        serializer: Arc<dyn AnnotationSerializer<A>>,
        dispatcher: Arc<ExportDispatcher<A>>,
    ) -> Result<Self> {
        let next_id = links.max_storage_id().await?.map_or(1, |max| max + 1);
        debug!("Opening storage catalog, next storage id is {next_id}");
        Ok(Self {
            factory,
            links,
            serializer,
            dispatcher,
            imports: Mutex::new(BTreeMap::new()),
            exports: Mutex::new(BTreeMap::new()),
            next_id: AtomicI64::new(next_id),
        })
    }

    pub fn links(&self) -> &Arc<dyn LinkRegistry> {
        &self.links
    }

    pub fn dispatcher(&self) -> &Arc<ExportDispatcher<A>> {
        &self.dispatcher
    }

    fn allocate_id(&self) -> StorageId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // Import storages

    pub async fn create_import_storage(
        &self,
        project_id: ProjectId,
        params: StorageParams,
    ) -> Result<StorageRecord> {
        let store = validate_connection(self.factory.as_ref(), &params.config).await?;
        let id = self.allocate_id();
        let storage = ImportStorage::new(
            id,
            project_id,
            params.config.clone(),
            store,
            self.links.clone(),
        );
        let record = StorageRecord {
            id,
            project_id,
            kind: storage.kind().clone(),
            title: params.title,
            description: params.description,
            config: params.config,
            last_sync: None,
        };
        lock(&self.imports).insert(
            id,
            Entry {
                record: record.clone(),
                storage: Arc::new(storage),
            },
        );
        info!("Created import storage {id} for project {project_id}");
        Ok(record)
    }

    /// Replaces title, description and connection parameters. The stored
    /// record is left untouched when the new parameters fail validation.
    pub async fn update_import_storage(
        &self,
        id: StorageId,
        params: StorageParams,
    ) -> Result<StorageRecord> {
        let project_id = self.get_import_storage(id)?.project_id;
        let store = validate_connection(self.factory.as_ref(), &params.config).await?;
        let storage = ImportStorage::new(
            id,
            project_id,
            params.config.clone(),
            store,
            self.links.clone(),
        );

        let mut imports = lock(&self.imports);
        let entry = imports
            .get_mut(&id)
            .ok_or_else(|| unknown_storage("import", id))?;
        entry.record.kind = storage.kind().clone();
        entry.record.title = params.title;
        entry.record.description = params.description;
        entry.record.config = params.config;
        entry.storage = Arc::new(storage);
        Ok(entry.record.clone())
    }

    pub fn get_import_storage(&self, id: StorageId) -> Result<StorageRecord> {
        lock(&self.imports)
            .get(&id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| unknown_storage("import", id))
    }

    pub fn list_import_storages(&self, project_id: ProjectId) -> Vec<StorageRecord> {
        lock(&self.imports)
            .values()
            .filter(|entry| entry.record.project_id == project_id)
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Removes the storage and every link it owns.
    pub async fn delete_import_storage(&self, id: StorageId) -> Result<u64> {
        let entry = lock(&self.imports)
            .remove(&id)
            .ok_or_else(|| unknown_storage("import", id))?;
        let removed = self
            .links
            .delete_for_storage(&entry.record.kind, id)
            .await?;
        info!("Deleted import storage {id} and {removed} link(s)");
        Ok(removed)
    }

    /// Imports new remote keys of storage `id` as tasks and records the
    /// outcome on the storage.
    pub async fn sync_import(&self, id: StorageId, sink: &dyn TaskSink) -> Result<SyncSummary> {
        let storage = lock(&self.imports)
            .get(&id)
            .map(|entry| entry.storage.clone())
            .ok_or_else(|| unknown_storage("import", id))?;

        let stats = SyncStats::default();
        let result = storage.scan_into(sink, &stats).await;
        let summary = match &result {
            Ok(()) => SyncSummary::completed(stats),
            Err(err) => SyncSummary::failed(stats, err),
        };
        if let Some(entry) = lock(&self.imports).get_mut(&id) {
            entry.record.last_sync = Some(summary.clone());
        }
        result.map(|()| summary)
    }

    // Export storages

    pub async fn create_export_storage(
        &self,
        project_id: ProjectId,
        params: StorageParams,
    ) -> Result<StorageRecord> {
        let store = validate_connection(self.factory.as_ref(), &params.config).await?;
        let id = self.allocate_id();
        let storage = Arc::new(self.export_storage(id, project_id, &params.config, store));
        let record = StorageRecord {
            id,
            project_id,
            kind: storage.kind().clone(),
            title: params.title,
            description: params.description,
            config: params.config,
            last_sync: None,
        };
        lock(&self.exports).insert(
            id,
            Entry {
                record: record.clone(),
                storage: storage.clone(),
            },
        );
        self.dispatcher.register(project_id, storage);
        info!("Created export storage {id} for project {project_id}");
        Ok(record)
    }

    pub async fn update_export_storage(
        &self,
        id: StorageId,
        params: StorageParams,
    ) -> Result<StorageRecord> {
        let project_id = self.get_export_storage(id)?.project_id;
        let store = validate_connection(self.factory.as_ref(), &params.config).await?;
        let storage = Arc::new(self.export_storage(id, project_id, &params.config, store));

        let record = {
            let mut exports = lock(&self.exports);
            let entry = exports
                .get_mut(&id)
                .ok_or_else(|| unknown_storage("export", id))?;
            entry.record.kind = storage.kind().clone();
            entry.record.title = params.title;
            entry.record.description = params.description;
            entry.record.config = params.config;
            entry.storage = storage.clone();
            entry.record.clone()
        };
        self.dispatcher.register(project_id, storage);
        Ok(record)
    }

    pub fn get_export_storage(&self, id: StorageId) -> Result<StorageRecord> {
        lock(&self.exports)
            .get(&id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| unknown_storage("export", id))
    }

    pub fn list_export_storages(&self, project_id: ProjectId) -> Vec<StorageRecord> {
        lock(&self.exports)
            .values()
            .filter(|entry| entry.record.project_id == project_id)
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Removes the storage, its handler and every link it owns.
    pub async fn delete_export_storage(&self, id: StorageId) -> Result<u64> {
        let entry = lock(&self.exports)
            .remove(&id)
            .ok_or_else(|| unknown_storage("export", id))?;
        self.dispatcher.unregister(entry.record.project_id, id);
        let removed = self
            .links
            .delete_for_storage(&entry.record.kind, id)
            .await?;
        info!("Deleted export storage {id} and {removed} link(s)");
        Ok(removed)
    }

    /// Re-exports `annotations` to storage `id` and records the outcome.
    pub async fn sync_export(&self, id: StorageId, annotations: &[A]) -> Result<SyncSummary> {
        let storage = lock(&self.exports)
            .get(&id)
            .map(|entry| entry.storage.clone())
            .ok_or_else(|| unknown_storage("export", id))?;

        let stats = SyncStats::default();
        let result = storage.sync_into(annotations, &stats).await;
        let summary = match &result {
            Ok(()) => SyncSummary::completed(stats),
            Err(err) => SyncSummary::failed(stats, err),
        };
        if let Some(entry) = lock(&self.exports).get_mut(&id) {
            entry.record.last_sync = Some(summary.clone());
        }
        result.map(|()| summary)
    }

    /// Drops links of an entity that is being deleted, across all storages.
    pub async fn delete_entity_links(&self, entity_id: EntityId) -> Result<u64> {
        self.links.delete_for_entity(entity_id).await
    }

    fn export_storage(
        &self,
        id: StorageId,
        project_id: ProjectId,
        config: &StorageConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> ExportStorage<A> {
        ExportStorage::new(
            id,
            project_id,
            config.clone(),
            store,
            self.links.clone(),
            self.serializer.clone(),
        )
    }
}
