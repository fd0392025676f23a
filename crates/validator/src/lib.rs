#![deny(unused)]
//! Static validation gate for untrusted Python code.
//!
//! Every piece of model-generated code passes through [`CodeValidator`]
//! before it is allowed anywhere near a sandbox. The validator parses the
//! code into a real Python AST and walks it, so syntactically invalid code
//! is rejected outright instead of being handed to an isolation unit.
//!
//! Validation is a pure function: identical input always yields an
//! identical result, no I/O, no side effects.

pub mod validator;

pub use validator::{CodeValidator, ValidationResult};
