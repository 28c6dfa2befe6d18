//! On-disk handling of downloaded result packages.

pub mod materializer;

pub use materializer::{MaterializedResult, ResultMaterializer};
