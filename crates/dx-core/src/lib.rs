//! # dx-core
//!
//! Core crate for the dominance broadcast engine, providing:
//!
//! - **Types** (`types`): market snapshots and derived readings
//! - **Estimator** (`estimator`): snapshot → dominance reading + trailing change
//! - **Cache** (`cache`): last-known-good reading and fallback policy
//! - **Display** (`display`): rendering of nickname / status strings
//! - **Configuration** (`config`): JSON config deserialization and validation
//! - **Error types** (`error`): `SourceError` / `DxError` via thiserror
//! - **Time utilities** (`time_util`): wall-clock timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod cache;
pub mod config;
pub mod display;
pub mod error;
pub mod estimator;
pub mod logging;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
