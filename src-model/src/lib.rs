//! Shared problem model for the divgroup solvers.
//!
//! Both engines (the three-phase MDGP search and the anticlustering
//! exchange method) work on the same ingredients: items identified by an
//! index in `[0, N)`, a dense symmetric dissimilarity matrix, a fixed
//! number of groups with per-group size bounds, and partitions of the
//! items into those groups. This crate owns those types plus the
//! validation and verification predicates the solvers rely on.

pub mod bounds;
pub mod dissim;
pub mod error;
pub mod solution;

pub use bounds::GroupBounds;
pub use dissim::DissimilarityMatrix;
pub use error::ModelError;
pub use solution::Solution;
