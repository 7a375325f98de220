//! Netscope Core - Foundation types and errors
//!
//! This crate provides the core abstractions used throughout netscope.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{NamespaceId, NamespaceRef, ProcessId};
