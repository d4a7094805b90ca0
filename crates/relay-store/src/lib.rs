//! # relay-store
//!
//! The shared state store: the only memory that survives between two calls
//! of the same logical session.
//!
//! - [`StateStore`]: async key/value contract with per-key expiry, atomic
//!   counters and FIFO lists
//! - [`MemoryStore`]: sharded in-process map for tests and single instances
//! - [`SqliteStore`]: SQLite file shared by every process on a host

#![deny(unsafe_code)]

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{Counter, SharedStore, StateStore, StoreExt};
