//! SQLite storage layer.
//!
//! `SqliteStore` implements both repository traits from `stepgate-core` on
//! top of split read/write connection pools in WAL mode.

pub mod approval;
pub mod pool;
pub mod store;
pub mod workflow;

pub use pool::DatabasePool;
pub use store::SqliteStore;
