//! Scheduled directory backups: archive, encrypt, upload, and a small HTTP
//! backup store to upload to.

pub mod archive;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod orchestrator;
pub mod schedule;
pub mod server;
pub mod store;
pub mod tls;
pub mod types;
pub mod utils;

pub use error::{BackupError, Result};
