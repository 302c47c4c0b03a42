/// Error type for the registration kernels.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistrationError {
    /// An input slice has the wrong number of elements.
    #[error("Invalid shape for {name}: expected {expected} elements, got {actual}")]
    InvalidShape {
        /// Name of the offending input.
        name: &'static str,
        /// Accepted length(s).
        expected: &'static str,
        /// Length actually provided.
        actual: usize,
    },

    /// The normal equations are singular or ill-conditioned and the solver was
    /// configured not to regularize them.
    #[error("Singular 6x6 system (condition number {condition:e})")]
    SingularSystem {
        /// Estimated condition number of the system matrix.
        condition: f64,
    },

    /// The inlier count slot of a reduction buffer is negative or not finite.
    #[error("Invalid inlier count {0} in reduction buffer")]
    InvalidCount(f32),

    /// The residual sum slot of a reduction buffer is not finite.
    #[error("Invalid residual sum {0} in reduction buffer")]
    InvalidResidual(f32),
}
