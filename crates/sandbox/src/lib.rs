#![deny(unused)]
//! Isolation backends for untrusted code execution.
//!
//! This crate provides the `Sandbox` trait and its two production backends:
//! one ephemeral Docker container per execution (`ContainerSandbox`, via
//! `bollard`) and one ephemeral Kubernetes Job per execution
//! (`ClusterJobSandbox`, via `kube`). Isolation units are never pooled or
//! shared across executions, and every unit is torn down on every exit
//! path, including caller cancellation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  ParallelToolExecutor (per-task deadlines)  │
//! │    ↓ tool_fn                                │
//! ├─────────────────────────────────────────────┤
//! │  CodeExecutionTool                          │
//! │    validate (airlock_validator)             │
//! │    ↓ only if valid                          │
//! ├─────────────────────────────────────────────┤
//! │  Sandbox trait                              │
//! │    ContainerSandbox │ ClusterJobSandbox     │
//! ├─────────────────────────────────────────────┤
//! │  Docker Engine      │ Kubernetes Job        │
//! │  cgroup caps, no    │ resource limits,      │
//! │  caps, no network   │ activeDeadline, TTL   │
//! └─────────────────────────────────────────────┘
//! ```

pub mod docker;
pub mod engine;
pub mod kubernetes;
pub mod tools;

pub use docker::ContainerSandbox;
pub use engine::{build_sandbox, MockSandbox, Sandbox};
pub use kubernetes::ClusterJobSandbox;
pub use tools::CodeExecutionTool;
