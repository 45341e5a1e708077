//! Persistence for the monitored fleet and its history
//!
//! ## Design
//!
//! - **Trait-based**: `MonitorStore` lets the engine run against any backend
//! - **Async**: All operations are async so check tasks can await their writes
//! - **Thin**: CRUD, status columns, append-only logs and a flat settings map
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with cascading deletes
//! - **In-Memory**: No persistence, for testing or `{"backend": "none"}`
//!
//! ## Usage
//!
//! ```no_run
//! use nodepulse::storage::{MonitorStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./nodepulse.db").await?;
//!     let devices = store.load_devices().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, MonitorStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use schema::{DeviceRecord, DowntimeInterval, LatencySample, NewDevice, NewService, ServiceRecord};
