pub mod interface;
pub mod storages;

pub use interface::{KeyValueStore, RemoteRecord, Revision, StoreFactory};
