#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia Registration
//!
//! Stateless kernels called once per iteration of an ICP-style registration loop:
//!
//! - **Pose conversion**: build 4x4 rigid transforms from `(R, t)` or from a 6-dof
//!   tangent-space pose `[alpha, beta, gamma, tx, ty, tz]`.
//! - **Reduction decoding**: unpack the compressed 27/29-element buffer produced by a
//!   parallel reduction into the 6x6 normal equations `JᵗJ · delta = Jᵗr`.
//! - **Linear solve**: Cholesky with a pseudo-inverse fallback for rank-deficient systems.
//!
//! ## Example
//!
//! ```rust
//! use kornia_registration::{decode_and_solve_6x6, pose_to_transformation, DecodeParams};
//!
//! // identity JᵗJ packed in the default lower row-major order, Jᵗr = 1
//! let mut buffer = vec![0.0f32; 27];
//! for (i, slot) in [0, 2, 5, 9, 14, 20].into_iter().enumerate() {
//!     buffer[slot] = 1.0;
//!     buffer[21 + i] = 1.0;
//! }
//!
//! let update = decode_and_solve_6x6(&buffer, &DecodeParams::default()).unwrap();
//! assert_eq!(update.delta(), [1.0; 6]);
//!
//! let transformation = pose_to_transformation(&update.delta()).unwrap();
//! assert_eq!(transformation[3], [0.0, 0.0, 0.0, 1.0]);
//! ```

mod error;
pub use error::RegistrationError;

/// Decode-and-solve entry points producing the pose update.
pub mod decode;
pub use decode::{
    decode_and_solve_6x6, decode_and_solve_6x6_with_count, decode_and_solve_6x6_with_residual,
    DecodeParams, PoseUpdate, NO_CORRESPONDENCES_RESIDUAL,
};

/// Compressed normal-equations wire format.
pub mod reduction;
pub use reduction::{
    decode_reduction, DecodedReduction, NormalEquations, PackingOrder, ReductionBuilder,
    ReductionDiagnostics, ReductionLayout,
};

/// Symmetric 6x6 linear solver.
pub mod solver;
pub use solver::{condition_number, solve_6x6, SingularPolicy, Solution, SolveMethod, SolverParams};

/// Conversions between rigid transform parameterizations.
pub mod transformation;
pub use transformation::{
    pose_to_transformation, pose_to_transformation_with, rt_to_transformation,
    transformation_to_pose, transformation_to_rt, RotationParameterization, Transformation,
};
