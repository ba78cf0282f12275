//! Hot findings store and cold archive storage.
//!
//! The hot side is the [`FindingsStore`] trait with an in-memory backend and a
//! ClickHouse backend. The cold side is the [`ColdStorage`] trait holding
//! gzip-compressed archive objects.

pub mod clickhouse_store;
pub mod cold;
pub mod cursor;
pub mod memory;
pub mod store;
pub mod timeout;

pub use clickhouse_store::{ClickHouseConfig, ClickHouseFindingsStore};
pub use cold::{
    ArchiveObject, ColdObjectInfo, ColdObjectKey, ColdStorage, FilesystemColdStorage,
    InMemoryColdStorage, LifecycleReport,
};
pub use cursor::{ExpiryCursor, PageCursor};
pub use memory::InMemoryFindingsStore;
pub use store::*;
pub use timeout::bounded;
