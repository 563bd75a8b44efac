use thiserror::Error;

/// Errors reported when constructing or validating problem data.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The group size bounds cannot admit any partition of the items.
    #[error("infeasible group bounds: {0}")]
    InfeasibleBounds(String),

    /// A caller-supplied assignment disagrees with the problem data.
    #[error("inconsistent assignment: {0}")]
    AssignmentMismatch(String),

    /// The dissimilarity matrix is not square.
    #[error("dissimilarity matrix must be square, got {rows}x{cols}")]
    ShapeMismatch { rows: usize, cols: usize },

    /// The dissimilarity matrix is not symmetric with a zero diagonal.
    #[error("dissimilarity matrix entry [{i}][{j}] breaks symmetry or the zero diagonal")]
    NotSymmetric { i: usize, j: usize },

    /// An item index lies outside `[0, N)`.
    #[error("item index {item} outside 0..{n}")]
    ItemOutOfRange { item: usize, n: usize },
}
