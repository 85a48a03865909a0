//! Pure data types for parr — task specs, results, configuration, registry entries.
//!
//! This crate is a leaf dependency with no async runtime and no I/O. It exists
//! so that consumers (report tooling, external integrations) can work with
//! parr's data model without pulling the kernel's transitive deps.

pub mod config;
pub mod registry;
pub mod result;
pub mod task;

// Flat re-exports for convenience
pub use config::*;
pub use registry::*;
pub use result::*;
pub use task::*;
