#![deny(unused)]
//! Core types, configuration, and error definitions for Airlock.
//!
//! This crate provides the foundational building blocks shared across the
//! validator, sandbox, and executor layers: the error taxonomy, the
//! read-only execution configuration, and the immutable value objects that
//! cross component boundaries (`ResourceLimits`, `ExecutionResult`,
//! `ToolInvocation`, `ToolResult`).

pub mod config;
pub mod error;
pub mod types;

pub use config::{ExecutionConfig, SandboxBackend};
pub use error::{Error, Result};
pub use types::*;
