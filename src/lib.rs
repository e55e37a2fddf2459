//! Batch mutation engine for the academic admin platform.
//!
//! The `rosterd` binary is a JSON-lines sidecar over stdin/stdout; this
//! library holds everything it drives.

pub mod api;
pub mod batch;
pub mod config;
pub mod db;
pub mod import;
pub mod ipc;
pub mod roster;
pub mod runner;
