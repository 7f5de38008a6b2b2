//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request URL
//!     → resolver.rs (prefix match, PATH_INFO split, sanitize)
//!     → None: not ours, hand the request back to the host
//!     → Some(relative path)
//!     → interpreter.rs (extension lookup)
//!     → Return: script path + optional interpreter
//! ```
//!
//! # Design Decisions
//! - Pure functions of the URL and the immutable configuration, no I/O
//! - Deterministic: same input always resolves to the same script
//! - First interpreter match wins (ordered table)

pub mod interpreter;
pub mod resolver;

pub use interpreter::{is_absolute_command, InterpreterSelector};
pub use resolver::PathResolver;
