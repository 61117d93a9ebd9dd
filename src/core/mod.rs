//! Core modules for the hive store.
//!
//! Storage plumbing, schema management, configuration, and shared primitives live
//! here. Domain operations live in `plugins`.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod migration;
pub mod output;
pub mod pool;
pub mod schemas;
pub mod store;
pub mod time;
