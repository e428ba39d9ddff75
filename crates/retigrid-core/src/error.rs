use thiserror::Error;

/// Result type used throughout the grid and aggregation code.
pub type Result<T> = std::result::Result<T, GridError>;

/// Errors raised while building grids or aggregating a measurement map.
///
/// Only `GridTooLarge` is routinely recovered by callers (see
/// [`crate::grid::square::square_grid_or_whole_image`]); the others indicate
/// inputs the geometry cannot handle or a violated shape contract.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    #[error("{message}")]
    GridTooLarge { message: String },

    #[error("expected 2 connected components in the {band} band, found {found}")]
    QuadrantSplit { band: &'static str, found: usize },

    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
}
