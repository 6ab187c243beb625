//! Naming model shared by the master and plugin processes.
//!
//! A *goal* is a short top-level verb (`release`, `lint`); a *task* is a slash-delimited
//! path rooted at a goal (`/release/mint/changelog`). The engine treats task identity as an
//! opaque path string; these types only add parsing, descriptions and dependency ordering.

mod error;
pub use error::ModelError;

mod domain;
pub use domain::*;
