//! rota-core - Core library for Rota
//!
//! This crate contains the row provenance model, snapshot store, merge
//! engine, and session layer behind the `rota` command-line interface.

pub mod config;
pub mod error;
pub mod merge;
pub mod models;
pub mod poll;
pub mod registry;
pub mod session;
pub mod store;
pub mod util;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use models::{Row, RowSet, SyncId};
pub use registry::{TableRegistry, TableSpec};
pub use session::{SaveOutcome, SyncSession, SyncStatus};
pub use store::SnapshotStore;
