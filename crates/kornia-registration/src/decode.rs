use serde::{Deserialize, Serialize};

use crate::{
    reduction::{decode_reduction, NormalEquations, PackingOrder, ReductionDiagnostics},
    solver::{solve_6x6, SingularPolicy, SolveMethod, SolverParams},
    RegistrationError,
};

/// Residual reported when a reduction has no inliers.
pub const NO_CORRESPONDENCES_RESIDUAL: f64 = f64::INFINITY;

/// Parameters for decoding and solving a reduction buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeParams {
    /// Element order of the packed `JᵗJ` triangle.
    pub packing: PackingOrder,
    /// Parameters of the linear solver.
    pub solver: SolverParams,
}

/// Incremental pose update decoded from a reduction buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PoseUpdate {
    /// Update from a 27-element buffer.
    Basic {
        /// Tangent-space update `[alpha, beta, gamma, tx, ty, tz]`.
        delta: [f32; 6],
        /// How the update was computed.
        method: SolveMethod,
    },
    /// Update from a 29-element buffer, with residual statistics.
    WithDiagnostics {
        /// Tangent-space update `[alpha, beta, gamma, tx, ty, tz]`.
        delta: [f32; 6],
        /// How the update was computed.
        method: SolveMethod,
        /// Root-mean-square residual, or [`NO_CORRESPONDENCES_RESIDUAL`] without inliers.
        residual: f64,
        /// Number of correspondences in the reduction.
        inlier_count: u64,
    },
}

impl PoseUpdate {
    /// The tangent-space update.
    pub fn delta(&self) -> [f32; 6] {
        match self {
            Self::Basic { delta, .. } | Self::WithDiagnostics { delta, .. } => *delta,
        }
    }

    /// How the update was computed.
    pub fn method(&self) -> SolveMethod {
        match self {
            Self::Basic { method, .. } | Self::WithDiagnostics { method, .. } => *method,
        }
    }

    /// Root-mean-square residual, if the buffer carried one.
    pub fn residual(&self) -> Option<f64> {
        match self {
            Self::Basic { .. } => None,
            Self::WithDiagnostics { residual, .. } => Some(*residual),
        }
    }

    /// Number of inliers, if the buffer carried it.
    pub fn inlier_count(&self) -> Option<u64> {
        match self {
            Self::Basic { .. } => None,
            Self::WithDiagnostics { inlier_count, .. } => Some(*inlier_count),
        }
    }
}

/// Decode a 27- or 29-element reduction buffer and solve for the 6-dof update.
///
/// # Arguments
///
/// * `buffer` - The compressed normal equations, 27 or 29 elements.
/// * `params` - Packing order and solver parameters.
///
/// # Returns
///
/// [`PoseUpdate::Basic`] for 27-element buffers, [`PoseUpdate::WithDiagnostics`] for
/// 29-element buffers.
///
/// # Errors
///
/// * [`RegistrationError::InvalidShape`] for any other buffer length.
/// * [`RegistrationError::InvalidResidual`] for a non-finite residual sum.
/// * [`RegistrationError::InvalidCount`] for a malformed inlier count.
/// * [`RegistrationError::SingularSystem`] for degenerate systems, or updates that do not
///   fit in `f32`, under [`crate::SingularPolicy::Error`].
pub fn decode_and_solve_6x6(
    buffer: &[f32],
    params: &DecodeParams,
) -> Result<PoseUpdate, RegistrationError> {
    let decoded = decode_reduction(buffer, params.packing)?;
    let (delta, method) = solve_update(&decoded.system, &params.solver)?;

    Ok(match decoded.diagnostics {
        None => PoseUpdate::Basic { delta, method },
        Some(diagnostics) => PoseUpdate::WithDiagnostics {
            delta,
            method,
            residual: rms_residual(&diagnostics),
            inlier_count: diagnostics.inlier_count,
        },
    })
}

/// Decode a 29-element reduction buffer and return the update and the RMS residual.
///
/// A 27-element buffer carries no residual and is rejected with
/// [`RegistrationError::InvalidShape`].
pub fn decode_and_solve_6x6_with_residual(
    buffer: &[f32],
    params: &DecodeParams,
) -> Result<([f32; 6], f32), RegistrationError> {
    let (delta, residual, _) = decode_and_solve_6x6_with_count(buffer, params)?;
    Ok((delta, residual as f32))
}

/// Decode a 29-element reduction buffer and return the update, the RMS residual and the
/// inlier count.
///
/// A 27-element buffer carries no residual and is rejected with
/// [`RegistrationError::InvalidShape`].
pub fn decode_and_solve_6x6_with_count(
    buffer: &[f32],
    params: &DecodeParams,
) -> Result<([f32; 6], f64, u64), RegistrationError> {
    let decoded = decode_reduction(buffer, params.packing)?;
    let Some(diagnostics) = decoded.diagnostics else {
        return Err(RegistrationError::InvalidShape {
            name: "reduction",
            expected: "29",
            actual: buffer.len(),
        });
    };

    let (delta, _) = solve_update(&decoded.system, &params.solver)?;
    Ok((delta, rms_residual(&diagnostics), diagnostics.inlier_count))
}

/// Solve the decoded system and narrow the update to `f32`.
///
/// An update that overflows `f32` is handled like any other non-finite system.
fn solve_update(
    system: &NormalEquations,
    params: &SolverParams,
) -> Result<([f32; 6], SolveMethod), RegistrationError> {
    let solution = solve_6x6(system, params)?;

    let mut delta = [0.0f32; 6];
    for (d, s) in delta.iter_mut().zip(solution.delta.iter()) {
        *d = *s as f32;
    }

    if delta.iter().all(|d| d.is_finite()) {
        return Ok((delta, solution.method));
    }

    match params.singular_policy {
        SingularPolicy::Error => Err(RegistrationError::SingularSystem {
            condition: f64::INFINITY,
        }),
        SingularPolicy::Regularize => {
            log::warn!("Update {:?} overflows f32, returning a zero update", solution.delta);
            Ok(([0.0; 6], SolveMethod::Zero))
        }
    }
}

/// `sqrt(residual_sum / inlier_count)`, or the sentinel when there are no inliers.
fn rms_residual(diagnostics: &ReductionDiagnostics) -> f64 {
    if diagnostics.inlier_count == 0 {
        log::warn!("Reduction has no inliers, reporting residual {NO_CORRESPONDENCES_RESIDUAL}");
        return NO_CORRESPONDENCES_RESIDUAL;
    }
    (diagnostics.residual_sum.max(0.0) / diagnostics.inlier_count as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduction::{JTJ_LEN, REDUCTION_LEN};

    fn identity_buffer(len: usize) -> Vec<f32> {
        let order = PackingOrder::default();
        let mut buffer = vec![0.0; len];
        for i in 0..6 {
            buffer[order.index(i, i)] = 1.0;
            buffer[JTJ_LEN + i] = 1.0;
        }
        buffer
    }

    #[test]
    fn test_decode_and_solve_identity() -> Result<(), RegistrationError> {
        let update = decode_and_solve_6x6(&identity_buffer(27), &DecodeParams::default())?;
        assert_eq!(
            update,
            PoseUpdate::Basic {
                delta: [1.0; 6],
                method: SolveMethod::Cholesky,
            }
        );
        assert_eq!(update.residual(), None);
        assert_eq!(update.inlier_count(), None);
        Ok(())
    }

    #[test]
    fn test_decode_and_solve_upper_packing() -> Result<(), RegistrationError> {
        let params = DecodeParams {
            packing: PackingOrder::UpperRowMajor,
            ..Default::default()
        };
        // diag(1..6) in upper row-major: diagonal slots 0, 6, 11, 15, 18, 20
        let mut buffer = vec![0.0; 27];
        for (i, slot) in [0, 6, 11, 15, 18, 20].into_iter().enumerate() {
            buffer[slot] = (i + 1) as f32;
            buffer[JTJ_LEN + i] = (i + 1) as f32;
        }
        let update = decode_and_solve_6x6(&buffer, &params)?;
        for d in update.delta() {
            approx::assert_relative_eq!(d, 1.0, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_decode_and_solve_residual() -> Result<(), RegistrationError> {
        let mut buffer = identity_buffer(29);
        buffer[27] = 4.0;
        buffer[28] = 4.0;

        let update = decode_and_solve_6x6(&buffer, &DecodeParams::default())?;
        assert_eq!(update.delta(), [1.0; 6]);
        assert_eq!(update.residual(), Some(1.0));
        assert_eq!(update.inlier_count(), Some(4));

        let (delta, residual) =
            decode_and_solve_6x6_with_residual(&buffer, &DecodeParams::default())?;
        assert_eq!(delta, [1.0; 6]);
        assert_eq!(residual, 1.0);

        let (delta, residual, count) =
            decode_and_solve_6x6_with_count(&buffer, &DecodeParams::default())?;
        assert_eq!(delta, [1.0; 6]);
        assert_eq!(residual, 1.0);
        assert_eq!(count, 4);
        Ok(())
    }

    #[test]
    fn test_decode_and_solve_zero_count() -> Result<(), RegistrationError> {
        let mut buffer = identity_buffer(29);
        buffer[27] = 0.0;
        buffer[28] = 0.0;

        let (_, residual, count) =
            decode_and_solve_6x6_with_count(&buffer, &DecodeParams::default())?;
        assert_eq!(count, 0);
        assert_eq!(residual, NO_CORRESPONDENCES_RESIDUAL);
        assert!(!residual.is_nan());

        let (_, residual) =
            decode_and_solve_6x6_with_residual(&buffer, &DecodeParams::default())?;
        assert_eq!(residual, f32::INFINITY);
        Ok(())
    }

    #[test]
    fn test_decode_and_solve_singular() -> Result<(), RegistrationError> {
        let mut buffer = vec![0.0; 29];
        for i in 0..6 {
            buffer[JTJ_LEN + i] = 1.0;
        }
        buffer[27] = 2.0;
        buffer[28] = 2.0;

        let update = decode_and_solve_6x6(&buffer, &DecodeParams::default())?;
        assert_eq!(update.method(), SolveMethod::Zero);
        assert_eq!(update.delta(), [0.0; 6]);
        assert_eq!(update.residual(), Some(1.0));

        let params = DecodeParams {
            solver: SolverParams {
                singular_policy: SingularPolicy::Error,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            decode_and_solve_6x6(&buffer, &params),
            Err(RegistrationError::SingularSystem { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_shape_every_entry_point() {
        let params = DecodeParams::default();
        for len in [0, 25, 26, 28, 30] {
            let buffer = vec![0.0; len];
            assert!(matches!(
                decode_and_solve_6x6(&buffer, &params),
                Err(RegistrationError::InvalidShape { actual, .. }) if actual == len
            ));
            assert!(matches!(
                decode_and_solve_6x6_with_residual(&buffer, &params),
                Err(RegistrationError::InvalidShape { actual, .. }) if actual == len
            ));
            assert!(matches!(
                decode_and_solve_6x6_with_count(&buffer, &params),
                Err(RegistrationError::InvalidShape { actual, .. }) if actual == len
            ));
        }

        // the residual entry points need the diagnostics slots
        let buffer = identity_buffer(REDUCTION_LEN);
        assert_eq!(
            decode_and_solve_6x6_with_residual(&buffer, &params),
            Err(RegistrationError::InvalidShape {
                name: "reduction",
                expected: "29",
                actual: 27,
            })
        );
        assert!(matches!(
            decode_and_solve_6x6_with_count(&buffer, &params),
            Err(RegistrationError::InvalidShape { expected: "29", .. })
        ));
    }

    #[test]
    fn test_decode_and_solve_nan_residual() {
        let mut buffer = identity_buffer(29);
        buffer[27] = f32::NAN;
        buffer[28] = 4.0;

        let params = DecodeParams::default();
        assert!(matches!(
            decode_and_solve_6x6(&buffer, &params),
            Err(RegistrationError::InvalidResidual(r)) if r.is_nan()
        ));
        assert!(matches!(
            decode_and_solve_6x6_with_count(&buffer, &params),
            Err(RegistrationError::InvalidResidual(r)) if r.is_nan()
        ));

        // a slightly negative sum from f32 cancellation still clamps to zero
        buffer[27] = -1e-7;
        assert_eq!(
            decode_and_solve_6x6_with_residual(&buffer, &params),
            Ok(([1.0; 6], 0.0))
        );
    }

    #[test]
    fn test_decode_and_solve_f32_overflow() -> Result<(), RegistrationError> {
        // a well conditioned system whose solution 1e60 does not fit in f32
        let order = PackingOrder::default();
        let mut buffer = vec![0.0; 29];
        for i in 0..6 {
            buffer[order.index(i, i)] = 1e-30;
            buffer[JTJ_LEN + i] = 1e30;
        }
        buffer[28] = 1.0;

        let update = decode_and_solve_6x6(&buffer, &DecodeParams::default())?;
        assert_eq!(update.method(), SolveMethod::Zero);
        assert_eq!(update.delta(), [0.0; 6]);

        let (delta, _, _) = decode_and_solve_6x6_with_count(&buffer, &DecodeParams::default())?;
        assert_eq!(delta, [0.0; 6]);

        let params = DecodeParams {
            solver: SolverParams {
                singular_policy: SingularPolicy::Error,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            decode_and_solve_6x6(&buffer, &params),
            Err(RegistrationError::SingularSystem { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_decode_params_serde() -> Result<(), serde_json::Error> {
        let params: DecodeParams = serde_json::from_str(
            r#"{"packing": "UpperRowMajor", "solver": {"singular_policy": "Error"}}"#,
        )?;
        assert_eq!(params.packing, PackingOrder::UpperRowMajor);
        assert_eq!(params.solver.singular_policy, SingularPolicy::Error);
        assert_eq!(params.solver.svd_tolerance, 1e-6);

        let json = serde_json::to_string(&DecodeParams::default())?;
        let parsed: DecodeParams = serde_json::from_str(&json)?;
        assert_eq!(parsed, DecodeParams::default());
        Ok(())
    }
}
