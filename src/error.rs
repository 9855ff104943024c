//! Error types for the warping pipeline

use thiserror::Error;

/// Every way a warp can fail.
///
/// None of these are retried inside the crate. Callers decide whether to ask
/// for more points or to retry with a larger regularization.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WarpError {
    /// Fewer than 3 correspondence pairs, or the two lists differ in length
    #[error("at least 3 paired points are required (got {dest} destination, {src} source)")]
    InsufficientPoints { dest: usize, src: usize },

    /// Degenerate point geometry, no stable affine fit exists
    #[error("affine estimation failed: {0}")]
    AffineEstimation(String),

    /// The regularized TPS system could not be solved
    #[error("thin plate spline system is singular: {0}")]
    SingularSystem(String),

    /// Malformed input that is not a geometry problem
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, WarpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = WarpError::InsufficientPoints { dest: 2, src: 3 };
        assert_eq!(
            err.to_string(),
            "at least 3 paired points are required (got 2 destination, 3 source)"
        );

        let err = WarpError::SingularSystem("zero pivot".into());
        assert!(err.to_string().contains("zero pivot"));
    }
}
