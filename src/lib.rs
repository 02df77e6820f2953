//! koca launcher
//!
//! Resolves the koca release binary for the host platform, downloads and
//! verifies it into a local cache on first use, then runs it with the
//! caller's arguments and standard streams.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod integrity;
pub mod launcher;
pub mod release;
pub mod ui;

pub use error::{LauncherError, LauncherResult};
