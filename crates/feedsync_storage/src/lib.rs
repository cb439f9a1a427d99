//! # Feedsync Storage
//!
//! Durable keyed state backends for feedsync.
//!
//! This crate provides the lowest-level persistence abstraction used by the
//! checkpoint store, the mapping snapshot history and the variant state
//! tracker. Backends are **opaque document stores** keyed by relative paths.
//!
//! ## Design Principles
//!
//! - Backends store bytes and never interpret them
//! - Every write is atomic with respect to process crash
//! - Must be `Send + Sync` for concurrent access
//! - The engine owns all document formats
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and dry runs
//! - [`FileBackend`] - For persistent storage in a locked state directory
//!
//! ## Example
//!
//! ```rust
//! use feedsync_storage::{InMemoryBackend, StateBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.write("variants.json", b"{}").unwrap();
//! assert_eq!(backend.list("").unwrap(), vec!["variants.json"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StateBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
