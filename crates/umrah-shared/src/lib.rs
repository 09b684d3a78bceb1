//! # umrah-shared
//!
//! Domain types, realtime wire protocol and constants shared by the chat
//! core crates and the push delivery worker.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use models::*;
pub use types::*;
