#![deny(unused)]
//! Bounded-concurrency tool execution.
//!
//! `ParallelToolExecutor` runs a batch of tool invocations concurrently
//! while guaranteeing that a single hung or hostile invocation cannot
//! block or delay the others: concurrency is capped by a semaphore,
//! each task carries its own deadline, failures are isolated per task,
//! and the result list always matches the input order and length.

pub mod parallel;

pub use parallel::ParallelToolExecutor;
