mod prelude;

pub mod base;
pub mod catalog;
pub mod collaborator;
pub mod error;
pub mod execution;
pub mod links;
pub mod ops;
pub mod settings;
pub mod utils;

pub use base::{Direction, EntityId, ProjectId, StorageId, StorageKind};
pub use catalog::{StorageCatalog, StorageParams, StorageRecord, validate_connection};
pub use collaborator::{Annotation, AnnotationSerializer, TaskSink};
pub use error::{Error, Result};
pub use execution::{
    ExportDispatcher, ExportHandler, ExportStorage, ImportStorage, SyncStats, SyncStatus,
    SyncSummary,
};
pub use links::{Link, LinkOutcome, LinkRegistry, MemoryLinkRegistry, open_registry};
pub use ops::storages::{CouchDbClient, CouchDbFactory, MemoryStore};
pub use ops::{KeyValueStore, RemoteRecord, Revision, StoreFactory};
pub use settings::{Settings, StorageConfig};
