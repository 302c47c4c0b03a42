use nalgebra::{Matrix6, Vector6};
use serde::{Deserialize, Serialize};

use crate::{reduction::NormalEquations, RegistrationError};

/// What to do when the normal equations are singular or ill-conditioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SingularPolicy {
    /// Solve with a truncated SVD pseudo-inverse. Directions that the correspondences do not
    /// constrain receive no update; an all-zero system yields a zero update.
    #[default]
    Regularize,
    /// Report [`RegistrationError::SingularSystem`] to the caller.
    Error,
}

/// Parameters of the 6x6 solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Policy for singular and ill-conditioned systems.
    pub singular_policy: SingularPolicy,
    /// Relative threshold below which a singular value (or squared Cholesky pivot ratio)
    /// is treated as zero.
    pub svd_tolerance: f64,
    /// Damping added to the diagonal before factorization, `H + λI`.
    pub regularization: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            singular_policy: SingularPolicy::Regularize,
            // the reduction is transported in f32
            svd_tolerance: 1e-6,
            regularization: 0.0,
        }
    }
}

/// Factorization that produced a [`Solution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveMethod {
    /// Cholesky `LLᵗ` of a well-conditioned positive definite system.
    Cholesky,
    /// Truncated SVD pseudo-inverse of a singular or ill-conditioned system.
    PseudoInverse,
    /// The system carried no information; the update is zero.
    Zero,
}

/// Solution of the normal equations.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// The tangent-space update `[alpha, beta, gamma, tx, ty, tz]`.
    pub delta: Vector6<f64>,
    /// How the update was computed.
    pub method: SolveMethod,
}

/// Solve the symmetric positive semi-definite system `hessian * delta = gradient`.
///
/// Cholesky is used when the system is positive definite and well conditioned. Otherwise
/// the behavior follows [`SolverParams::singular_policy`].
///
/// # Arguments
///
/// * `system` - The normal equations.
/// * `params` - Solver parameters.
///
/// # Returns
///
/// The update and the method used. The update never contains NaN under
/// [`SingularPolicy::Regularize`].
pub fn solve_6x6(
    system: &NormalEquations,
    params: &SolverParams,
) -> Result<Solution, RegistrationError> {
    let NormalEquations { hessian, gradient } = system;

    if !hessian.iter().chain(gradient.iter()).all(|v| v.is_finite()) {
        log::warn!("Normal equations contain non-finite entries");
        return match params.singular_policy {
            SingularPolicy::Regularize => Ok(zero_solution()),
            SingularPolicy::Error => Err(RegistrationError::SingularSystem {
                condition: f64::INFINITY,
            }),
        };
    }

    let lhs = hessian + Matrix6::identity() * params.regularization;

    if let Some(chol) = lhs.cholesky() {
        let pivots = chol.l().diagonal();
        let ratio = pivots.min() / pivots.max();
        if ratio * ratio > params.svd_tolerance {
            log::debug!("Solved normal equations with Cholesky, pivot ratio {ratio:e}");
            return Ok(Solution {
                delta: chol.solve(gradient),
                method: SolveMethod::Cholesky,
            });
        }
    }

    let svd = lhs.svd(true, true);
    let max_sv = svd.singular_values.max();
    let min_sv = svd.singular_values.min();
    let condition = if min_sv > 0.0 {
        max_sv / min_sv
    } else {
        f64::INFINITY
    };

    if params.singular_policy == SingularPolicy::Error {
        return Err(RegistrationError::SingularSystem { condition });
    }

    if max_sv <= 0.0 {
        log::warn!("Normal equations are zero, returning a zero update");
        return Ok(zero_solution());
    }

    log::warn!("Ill-conditioned normal equations (condition {condition:e}), using pseudo-inverse");
    let delta = svd
        .solve(gradient, params.svd_tolerance * max_sv)
        .map_err(|_| RegistrationError::SingularSystem { condition })?;

    Ok(Solution {
        delta,
        method: SolveMethod::PseudoInverse,
    })
}

/// Condition number of a 6x6 matrix, the ratio of its largest to smallest singular value.
///
/// Returns `f64::INFINITY` for singular matrices.
pub fn condition_number(mat: &Matrix6<f64>) -> f64 {
    let svd = mat.svd(false, false);
    let max_sv = svd.singular_values.max();
    let min_sv = svd.singular_values.min();

    if min_sv < 1e-15 {
        f64::INFINITY
    } else {
        max_sv / min_sv
    }
}

fn zero_solution() -> Solution {
    Solution {
        delta: Vector6::zeros(),
        method: SolveMethod::Zero,
    }
}
