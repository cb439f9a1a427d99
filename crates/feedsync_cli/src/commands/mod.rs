//! CLI command implementations.

pub mod debug;
pub mod maintenance;
pub mod sync;
