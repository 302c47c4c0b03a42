//! The compressed normal-equations buffer exchanged between a reduction kernel and the solver.
//!
//! A buffer holds, in order:
//!
//! | slots     | content                                              |
//! |-----------|------------------------------------------------------|
//! | `0..21`   | the triangle of the symmetric `JᵗJ`, see [`PackingOrder`] |
//! | `21..27`  | `Jᵗr`                                                |
//! | `27`      | sum of squared residuals (optional)                  |
//! | `28`      | inlier count, stored as a float (optional)           |
//!
//! Buffers are either 27 or 29 elements long; see [`ReductionLayout`].

use nalgebra::{Matrix6, Vector6};
use serde::{Deserialize, Serialize};

use crate::RegistrationError;

/// Number of packed entries of the symmetric 6x6 `JᵗJ`.
pub const JTJ_LEN: usize = 21;

/// Number of entries of `Jᵗr`.
pub const JTR_LEN: usize = 6;

/// Length of a buffer without residual and inlier count.
pub const REDUCTION_LEN: usize = JTJ_LEN + JTR_LEN;

/// Length of a buffer carrying residual sum and inlier count.
pub const REDUCTION_WITH_DIAGNOSTICS_LEN: usize = REDUCTION_LEN + 2;

/// Element order of the 21 packed `JᵗJ` entries.
///
/// Producer and consumer must agree on the order; [`PackingOrder::LowerRowMajor`] is the
/// order emitted by the reduction kernels and is the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackingOrder {
    /// Lower triangle row by row: `(0,0) (1,0) (1,1) (2,0) (2,1) (2,2) ...`.
    ///
    /// Equivalent to the upper triangle traversed column by column.
    #[default]
    LowerRowMajor,
    /// Upper triangle row by row: `(0,0) (0,1) ... (0,5) (1,1) (1,2) ...`.
    UpperRowMajor,
}

impl PackingOrder {
    /// Version of the wire contract described by this enum.
    pub const SCHEMA_VERSION: u32 = 1;

    /// Packed slot of the entry `(row, col)` of `JᵗJ`. Symmetric in its arguments.
    ///
    /// PRECONDITION: `row < 6` and `col < 6`.
    pub fn index(&self, row: usize, col: usize) -> usize {
        let (hi, lo) = if row >= col { (row, col) } else { (col, row) };
        match self {
            PackingOrder::LowerRowMajor => hi * (hi + 1) / 2 + lo,
            // rows before `lo` contribute 6, 5, 4, ... entries
            PackingOrder::UpperRowMajor => lo * (11 - lo) / 2 + hi,
        }
    }

    /// Pack the triangle of a symmetric matrix into its 21 wire entries.
    pub fn pack(&self, mat: &Matrix6<f64>) -> [f32; JTJ_LEN] {
        let mut packed = [0.0; JTJ_LEN];
        for row in 0..6 {
            for col in 0..=row {
                packed[self.index(row, col)] = mat[(row, col)] as f32;
            }
        }
        packed
    }

    /// Unpack 21 wire entries into the full symmetric matrix.
    ///
    /// PRECONDITION: `packed` has at least [`JTJ_LEN`] elements.
    pub fn unpack(&self, packed: &[f32]) -> Matrix6<f64> {
        Matrix6::from_fn(|row, col| packed[self.index(row, col)] as f64)
    }
}

/// The two valid buffer layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionLayout {
    /// `JᵗJ` and `Jᵗr` only, 27 elements.
    Basic,
    /// `JᵗJ`, `Jᵗr`, residual sum and inlier count, 29 elements.
    WithDiagnostics,
}

impl ReductionLayout {
    /// Determine the layout from a buffer length.
    pub fn from_len(len: usize) -> Result<Self, RegistrationError> {
        match len {
            REDUCTION_LEN => Ok(Self::Basic),
            REDUCTION_WITH_DIAGNOSTICS_LEN => Ok(Self::WithDiagnostics),
            _ => Err(RegistrationError::InvalidShape {
                name: "reduction",
                expected: "27 or 29",
                actual: len,
            }),
        }
    }

    /// Buffer length of this layout.
    pub fn buffer_len(&self) -> usize {
        match self {
            Self::Basic => REDUCTION_LEN,
            Self::WithDiagnostics => REDUCTION_WITH_DIAGNOSTICS_LEN,
        }
    }
}

/// The 6x6 normal equations `hessian * delta = gradient`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalEquations {
    /// Gauss-Newton approximation of the Hessian, `Σ JᵗJ`.
    pub hessian: Matrix6<f64>,
    /// Right-hand side, `Σ Jᵗr`.
    pub gradient: Vector6<f64>,
}

/// Residual statistics carried by a 29-element buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReductionDiagnostics {
    /// Sum of squared residuals over all inliers.
    pub residual_sum: f64,
    /// Number of correspondences that contributed to the reduction.
    pub inlier_count: u64,
}

/// A decoded reduction buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReduction {
    /// The normal equations.
    pub system: NormalEquations,
    /// Residual statistics, present only for 29-element buffers.
    pub diagnostics: Option<ReductionDiagnostics>,
}

/// Decode a compressed 27- or 29-element reduction buffer.
///
/// # Arguments
///
/// * `buffer` - The reduction buffer.
/// * `order` - Element order of the packed `JᵗJ` triangle.
///
/// # Errors
///
/// * [`RegistrationError::InvalidShape`] if the buffer is neither 27 nor 29 elements long.
/// * [`RegistrationError::InvalidResidual`] if the residual sum slot is not finite.
/// * [`RegistrationError::InvalidCount`] if the inlier count slot is negative or not finite.
pub fn decode_reduction(
    buffer: &[f32],
    order: PackingOrder,
) -> Result<DecodedReduction, RegistrationError> {
    let layout = ReductionLayout::from_len(buffer.len())?;

    let hessian = order.unpack(&buffer[..JTJ_LEN]);
    let gradient = Vector6::from_fn(|i, _| buffer[JTJ_LEN + i] as f64);

    let diagnostics = match layout {
        ReductionLayout::Basic => None,
        ReductionLayout::WithDiagnostics => {
            let residual_sum = buffer[REDUCTION_LEN];
            if !residual_sum.is_finite() {
                return Err(RegistrationError::InvalidResidual(residual_sum));
            }
            let count = buffer[REDUCTION_LEN + 1];
            if !count.is_finite() || count < 0.0 {
                return Err(RegistrationError::InvalidCount(count));
            }
            Some(ReductionDiagnostics {
                residual_sum: residual_sum as f64,
                inlier_count: count.round() as u64,
            })
        }
    };

    Ok(DecodedReduction {
        system: NormalEquations { hessian, gradient },
        diagnostics,
    })
}

/// Accumulates linearized residuals into a reduction buffer.
///
/// This is the reference producer of the wire format. Residuals follow the convention
/// `r = target - prediction` and Jacobian rows are `∂prediction / ∂[alpha, beta, gamma, tx, ty, tz]`,
/// so that the solution of the decoded system is the update to apply.
#[derive(Debug, Clone)]
pub struct ReductionBuilder {
    jtj: Matrix6<f64>,
    jtr: Vector6<f64>,
    residual_sum: f64,
    inlier_count: u64,
}

impl Default for ReductionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReductionBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            jtj: Matrix6::zeros(),
            jtr: Vector6::zeros(),
            residual_sum: 0.0,
            inlier_count: 0,
        }
    }

    /// Add one correspondence made of one or more residual rows sharing a weight.
    ///
    /// # Arguments
    ///
    /// * `rows` - `(jacobian, residual)` pairs, e.g. three rows for a point-to-point term.
    /// * `weight` - Robust kernel weight of the correspondence.
    pub fn add_correspondence(&mut self, rows: &[([f64; 6], f64)], weight: f64) {
        for (jacobian, residual) in rows {
            let j = Vector6::from_column_slice(jacobian);
            self.jtj += j * j.transpose() * weight;
            self.jtr += j * (residual * weight);
            self.residual_sum += weight * residual * residual;
        }
        self.inlier_count += 1;
    }

    /// Merge another partial reduction, e.g. from a different worker.
    pub fn merge(&mut self, other: &ReductionBuilder) {
        self.jtj += other.jtj;
        self.jtr += other.jtr;
        self.residual_sum += other.residual_sum;
        self.inlier_count += other.inlier_count;
    }

    /// Number of correspondences added so far.
    pub fn inlier_count(&self) -> u64 {
        self.inlier_count
    }

    /// Encode the accumulated system into a wire buffer.
    ///
    /// # Arguments
    ///
    /// * `order` - Element order of the packed `JᵗJ` triangle.
    /// * `layout` - Whether to append the residual sum and inlier count.
    pub fn encode(&self, order: PackingOrder, layout: ReductionLayout) -> Vec<f32> {
        let mut buffer = Vec::with_capacity(layout.buffer_len());
        buffer.extend_from_slice(&order.pack(&self.jtj));
        buffer.extend(self.jtr.iter().map(|v| *v as f32));
        if layout == ReductionLayout::WithDiagnostics {
            buffer.push(self.residual_sum as f32);
            buffer.push(self.inlier_count as f32);
        }
        buffer
    }
}
