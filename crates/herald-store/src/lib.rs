//! # herald-store
//!
//! Durable cache of the messages and contacts the session has observed.
//!
//! Everything lives in memory behind a [`Store`] handle and is persisted as a
//! single JSON snapshot that is atomically replaced on every flush. Writes are
//! last-write-wins in the order they are applied, never by comparing the
//! timestamps carried inside payloads.

pub mod contacts;
pub mod flusher;
pub mod messages;
pub mod models;
pub mod snapshot;
pub mod store;

mod error;

pub use error::{Result, StoreError};
pub use flusher::spawn_flush_task;
pub use models::*;
pub use store::Store;
