//! Logging setup shared by the master and plugin binaries.

mod logger;
pub use logger::*;
