//! # Feedsync Testkit
//!
//! Test utilities for feedsync.
//!
//! This crate provides:
//! - Scripted fakes for every collaborator, with fault injection
//! - A checkpoint store that simulates crashes on a chosen commit
//! - Fixtures and an orchestrator harness over memory or disk state
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use feedsync_testkit::prelude::*;
//!
//! #[test]
//! fn first_run_is_full() {
//!     let harness = Harness::memory().seeded(
//!         vec![variant("v1", 1, &["loc1"])],
//!         mapping(&[("loc1", &["US"])]),
//!     );
//!     let summary = harness.orchestrator().run(None).unwrap();
//!     assert_eq!(summary.strategy, Strategy::Full);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fakes;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fakes::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use feedsync_engine::{Orchestrator, SyncError};
    pub use feedsync_types::{Phase, RunStatus, Strategy};
}

pub use fakes::*;
pub use fixtures::*;
pub use generators::*;
