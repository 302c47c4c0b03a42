use glam::{DMat3, DQuat, DVec3};
use serde::{Deserialize, Serialize};

use crate::RegistrationError;

/// A 4x4 homogeneous rigid transformation stored in row-major order.
///
/// The upper-left 3x3 block is the rotation, the upper-right column the translation
/// and the bottom row is always `[0, 0, 0, 1]`.
pub type Transformation = [[f32; 4]; 4];

/// Convention used to turn the three rotation parameters of a pose into a rotation matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationParameterization {
    /// SO(3) exponential map of the skew-symmetric matrix `[w]×`, `w = (alpha, beta, gamma)`.
    ///
    /// This is the tangent-space convention of the update vector returned by the solver.
    #[default]
    ExpMap,
    /// Euler angles composed as `Rz(gamma) * Ry(beta) * Rx(alpha)`.
    EulerZyx,
}

/// Convert a rotation and a translation to a 4x4 transformation matrix.
///
/// # Arguments
///
/// * `r` - The rotation matrix in row-major order, 9 elements.
/// * `t` - The translation vector, 3 elements.
///
/// # Returns
///
/// The transformation matrix, or [`RegistrationError::InvalidShape`] if any input has
/// the wrong number of elements.
///
/// PRECONDITION: `r` is orthonormal with determinant +1.
///
/// Example:
///
/// ```
/// use kornia_registration::rt_to_transformation;
///
/// let r = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
/// let t = [1.0, 2.0, 3.0];
/// let dst_t_src = rt_to_transformation(&r, &t).unwrap();
/// assert_eq!(dst_t_src[0], [1.0, 0.0, 0.0, 1.0]);
/// assert_eq!(dst_t_src[3], [0.0, 0.0, 0.0, 1.0]);
/// ```
pub fn rt_to_transformation(r: &[f32], t: &[f32]) -> Result<Transformation, RegistrationError> {
    check_len("rotation", r, 9, "9 (3x3)")?;
    check_len("translation", t, 3, "3")?;

    let mut transformation = [[0.0; 4]; 4];
    for (i, row) in transformation.iter_mut().take(3).enumerate() {
        row[..3].copy_from_slice(&r[i * 3..i * 3 + 3]);
        row[3] = t[i];
    }
    transformation[3][3] = 1.0;

    Ok(transformation)
}

/// Convert a 6-dof pose `[alpha, beta, gamma, tx, ty, tz]` to a 4x4 transformation.
///
/// The rotation parameters are interpreted as a tangent-space vector and mapped through
/// the SO(3) exponential, matching the update returned by [`crate::decode_and_solve_6x6`].
///
/// Example:
///
/// ```
/// use kornia_registration::pose_to_transformation;
///
/// let identity = pose_to_transformation(&[0.0; 6]).unwrap();
/// assert_eq!(identity[0], [1.0, 0.0, 0.0, 0.0]);
/// assert_eq!(identity[3], [0.0, 0.0, 0.0, 1.0]);
/// ```
pub fn pose_to_transformation(pose: &[f32]) -> Result<Transformation, RegistrationError> {
    pose_to_transformation_with(pose, RotationParameterization::ExpMap)
}

/// Convert a 6-dof pose to a 4x4 transformation using an explicit rotation convention.
///
/// # Arguments
///
/// * `pose` - The pose `[alpha, beta, gamma, tx, ty, tz]`, 6 elements.
/// * `parameterization` - How `(alpha, beta, gamma)` is turned into a rotation.
pub fn pose_to_transformation_with(
    pose: &[f32],
    parameterization: RotationParameterization,
) -> Result<Transformation, RegistrationError> {
    check_len("pose", pose, 6, "6")?;

    let omega = DVec3::new(pose[0] as f64, pose[1] as f64, pose[2] as f64);
    let rotation = match parameterization {
        RotationParameterization::ExpMap => so3_exp(omega),
        RotationParameterization::EulerZyx => {
            DMat3::from_rotation_z(omega.z)
                * DMat3::from_rotation_y(omega.y)
                * DMat3::from_rotation_x(omega.x)
        }
    };

    let mut transformation = [[0.0; 4]; 4];
    for (i, row) in transformation.iter_mut().take(3).enumerate() {
        for (j, val) in row.iter_mut().take(3).enumerate() {
            // glam is column-major
            *val = rotation.col(j)[i] as f32;
        }
        row[3] = pose[3 + i];
    }
    transformation[3][3] = 1.0;

    Ok(transformation)
}

/// Convert a 4x4 transformation back to a tangent-space pose `[alpha, beta, gamma, tx, ty, tz]`.
///
/// This is the inverse of [`pose_to_transformation`] for rotation angles below π.
///
/// PRECONDITION: the upper-left block of `transformation` is a rotation matrix.
pub fn transformation_to_pose(transformation: &Transformation) -> [f32; 6] {
    let rotation = DMat3::from_cols(
        DVec3::new(
            transformation[0][0] as f64,
            transformation[1][0] as f64,
            transformation[2][0] as f64,
        ),
        DVec3::new(
            transformation[0][1] as f64,
            transformation[1][1] as f64,
            transformation[2][1] as f64,
        ),
        DVec3::new(
            transformation[0][2] as f64,
            transformation[1][2] as f64,
            transformation[2][2] as f64,
        ),
    );
    let omega = so3_log(&rotation);

    [
        omega.x as f32,
        omega.y as f32,
        omega.z as f32,
        transformation[0][3],
        transformation[1][3],
        transformation[2][3],
    ]
}

/// Split a 4x4 transformation into a row-major rotation and a translation.
pub fn transformation_to_rt(transformation: &Transformation) -> ([f32; 9], [f32; 3]) {
    let mut r = [0.0; 9];
    let mut t = [0.0; 3];
    for (i, row) in transformation.iter().take(3).enumerate() {
        r[i * 3..i * 3 + 3].copy_from_slice(&row[..3]);
        t[i] = row[3];
    }
    (r, t)
}

fn check_len(
    name: &'static str,
    data: &[f32],
    len: usize,
    expected: &'static str,
) -> Result<(), RegistrationError> {
    if data.len() != len {
        return Err(RegistrationError::InvalidShape {
            name,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn so3_exp(omega: DVec3) -> DMat3 {
    DMat3::from_quat(DQuat::from_scaled_axis(omega))
}

fn so3_log(rotation: &DMat3) -> DVec3 {
    let q = DQuat::from_mat3(rotation);
    // q and -q are the same rotation, w >= 0 keeps the angle in [0, π]
    let q = if q.w < 0.0 { -q } else { q };
    q.to_scaled_axis()
}
