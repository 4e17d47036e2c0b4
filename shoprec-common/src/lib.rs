//! # shoprec common library
//!
//! Shared code for the shoprec recommendation services:
//! - Error taxonomy and `Result` alias
//! - `UserEvent` data model and event types
//! - Configuration loading (TOML + CLI/env overrides)
//! - Key-value store boundary and its in-process implementation
//! - Time and id helpers

pub mod config;
pub mod error;
pub mod events;
pub mod kv;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use events::{EventType, UserEvent};
pub use kv::{KvStore, MemoryStore};
