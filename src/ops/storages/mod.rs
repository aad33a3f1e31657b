pub mod couchdb;
pub mod memory;

pub use couchdb::{CouchDbClient, CouchDbFactory};
pub use memory::MemoryStore;
