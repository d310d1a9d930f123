//! SIRENE Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient plumbing shared by the SIRENE sync binaries.
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` environment
//!   variables (console, rolling file, or both; text or JSON)
//!
//! # Example
//!
//! ```no_run
//! use sirene_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput};
