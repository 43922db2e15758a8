use thiserror::Error;

/// Result type alias for mesh construction.
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors raised while building the beam lattice and registering its elements.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeshError {
    /// A grid count, spacing or material parameter is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The produced data could not be registered into the FEM model.
    #[error("mesh construction failed: {0}")]
    ConstructionFailure(String),
}

impl MeshError {
    #[must_use]
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        Self::InvalidArgument(details.into())
    }

    #[must_use]
    pub fn construction_failure(details: impl Into<String>) -> Self {
        Self::ConstructionFailure(details.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_details() {
        let err = MeshError::invalid_argument("count_x must be at least 1");
        assert!(err.to_string().contains("count_x"));

        let err = MeshError::construction_failure("element 3 is degenerate");
        assert!(err.to_string().starts_with("mesh construction failed"));
    }
}
