pub mod events;
pub mod export;
pub mod import;
pub mod stats;

pub use events::{ExportDispatcher, ExportHandler};
pub use export::ExportStorage;
pub use import::ImportStorage;
pub use stats::{SyncStats, SyncStatus, SyncSummary};
