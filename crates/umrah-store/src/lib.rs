//! # umrah-store
//!
//! Local SQLite storage for the push delivery worker's offline cache.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection`, with typed helpers for versioned cached assets.

pub mod assets;
pub mod database;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
