//! Head-pose solve from three facial landmarks.
//!
//! The solve is a perspective-n-point fit of a fixed face model onto the
//! observed nose and eye positions. It always starts from an explicit seed and
//! keeps no state between calls, so every frame is solved from scratch.
//!
//! Levenberg-Marquardt needs at least as many residuals as unknowns, and three
//! landmarks only give six. The nose is therefore fed twice, on the model side
//! and on the image side, which gives the four correspondences the solve
//! expects. Swapping in a solver that handles three points directly only needs
//! a new [`HeadPoseSolver`] implementation.

use anyhow::Result;
use nalgebra::{Point2, Point3, Rotation3, SMatrix, SVector, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Number of model/image correspondences fed to the solver.
pub const CORRESPONDENCES: usize = 4;

type Residuals = SVector<f64, { CORRESPONDENCES * 2 }>;
type Jacobian = SMatrix<f64, { CORRESPONDENCES * 2 }, 6>;

/// Pinhole intrinsics derived from the frame size. No lens distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub focal_length: f64,
    pub center: Point2<f64>,
}

impl CameraIntrinsics {
    /// Focal length equal to the frame width, principal point at the frame center.
    pub fn from_frame_size(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("invalid frame size {}x{}", width, height);
        }
        Ok(Self {
            focal_length: width as f64,
            center: Point2::new(width as f64 / 2.0, height as f64 / 2.0),
        })
    }

    /// Project a point given in camera coordinates onto the image plane.
    pub fn project(&self, p: &Point3<f64>) -> Point2<f64> {
        Point2::new(
            self.focal_length * p.x / p.z + self.center.x,
            self.focal_length * p.y / p.z + self.center.y,
        )
    }

    fn is_valid(&self) -> bool {
        self.focal_length.is_finite()
            && self.focal_length > 0.0
            && self.center.x.is_finite()
            && self.center.y.is_finite()
    }
}

/// Reference face used by the solve: nose tip (twice), left and right outer eye corners.
///
/// The frame is arbitrary. These coordinates put a face that looks straight
/// into the camera at a half-turn about the optical axis, which is where
/// [`SolverSeed`] starts.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceModelPoints {
    points: [Point3<f64>; CORRESPONDENCES],
}

impl FaceModelPoints {
    pub const NOSE_TIP: [f64; 3] = [0.0, 0.0, 0.0];
    pub const LEFT_EYE_CORNER: [f64; 3] = [225.0, 170.0, 135.0];
    pub const RIGHT_EYE_CORNER: [f64; 3] = [-225.0, 170.0, 135.0];

    pub fn standard() -> Self {
        let p = |c: [f64; 3]| Point3::new(c[0], c[1], c[2]);
        Self {
            points: [
                p(Self::NOSE_TIP),
                p(Self::NOSE_TIP),
                p(Self::LEFT_EYE_CORNER),
                p(Self::RIGHT_EYE_CORNER),
            ],
        }
    }

    pub fn points(&self) -> &[Point3<f64>; CORRESPONDENCES] {
        &self.points
    }
}

impl Default for FaceModelPoints {
    fn default() -> Self {
        Self::standard()
    }
}

/// Observed nose and eye positions in frame pixels. Left/right are camera-relative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceLandmarks {
    pub nose: Point2<f64>,
    pub left_eye: Point2<f64>,
    pub right_eye: Point2<f64>,
}

impl FaceLandmarks {
    /// Image-side correspondences in model order, nose duplicated.
    pub fn image_points(&self) -> [Point2<f64>; CORRESPONDENCES] {
        [self.nose, self.nose, self.left_eye, self.right_eye]
    }

    fn is_finite(&self) -> bool {
        [self.nose, self.left_eye, self.right_eye]
            .iter()
            .all(|p| p.x.is_finite() && p.y.is_finite())
    }
}

/// Initial rotation/translation handed to the solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSeed {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl SolverSeed {
    pub const TRANSLATION: [f64; 3] = [-100.0, 100.0, 1000.0];
    pub const LOOKING_LEFT: [f64; 3] = [-1.0, -0.75, -3.0];
    pub const LOOKING_RIGHT: [f64; 3] = [1.0, -0.75, -3.0];

    /// Pick the seed from which way the head appears turned.
    ///
    /// The eye horizontally closer to the nose is on the side the head is
    /// turned towards. Ties go to the "looking right" rotation.
    pub fn for_landmarks(landmarks: &FaceLandmarks) -> Self {
        let to_left = (landmarks.left_eye.x - landmarks.nose.x).abs();
        let to_right = (landmarks.right_eye.x - landmarks.nose.x).abs();
        let rvec = if to_left < to_right {
            Self::LOOKING_LEFT
        } else {
            Self::LOOKING_RIGHT
        };
        Self {
            rvec: Vector3::from(rvec),
            tvec: Vector3::from(Self::TRANSLATION),
        }
    }

    pub fn is_looking_left(&self) -> bool {
        self.rvec == Vector3::from(Self::LOOKING_LEFT)
    }
}

/// Output of a successful solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolvedRotation {
    /// Rodrigues rotation vector, radians.
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
    /// RMS reprojection error in pixels.
    pub reprojection_error: f64,
}

impl SolvedRotation {
    pub fn degrees(&self) -> [f64; 3] {
        [
            self.rvec.x.to_degrees(),
            self.rvec.y.to_degrees(),
            self.rvec.z.to_degrees(),
        ]
    }
}

/// Anything that can fit the face model onto observed landmarks.
pub trait HeadPoseSolver {
    /// Returns `None` when no usable pose was found.
    fn solve(
        &self,
        model: &FaceModelPoints,
        image_points: &[Point2<f64>; CORRESPONDENCES],
        intrinsics: &CameraIntrinsics,
        seed: &SolverSeed,
    ) -> Option<SolvedRotation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub max_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
        }
    }
}

/// Iterative PnP: Levenberg-Marquardt on the reprojection error, seeded.
#[derive(Debug, Clone, Default)]
pub struct PnpSolver {
    settings: SolverSettings,
}

const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e12;
const DIAGONAL_FLOOR: f64 = 1e-9;
const COST_TOLERANCE: f64 = 1e-12;
const STEP_TOLERANCE: f64 = 1e-10;
const JACOBIAN_STEP: f64 = 1e-6;

impl PnpSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    fn residuals(
        params: &Vector6<f64>,
        model: &FaceModelPoints,
        image_points: &[Point2<f64>; CORRESPONDENCES],
        intrinsics: &CameraIntrinsics,
    ) -> Residuals {
        let (rotation, translation) = split(params);
        let mut r = Residuals::zeros();
        for (i, (object, observed)) in model.points().iter().zip(image_points).enumerate() {
            let projected = intrinsics.project(&(rotation * object + translation));
            r[i * 2] = projected.x - observed.x;
            r[i * 2 + 1] = projected.y - observed.y;
        }
        r
    }

    fn jacobian(
        params: &Vector6<f64>,
        model: &FaceModelPoints,
        image_points: &[Point2<f64>; CORRESPONDENCES],
        intrinsics: &CameraIntrinsics,
    ) -> Jacobian {
        let mut jac = Jacobian::zeros();
        for k in 0..6 {
            let h = JACOBIAN_STEP * params[k].abs().max(1.0);
            let mut plus = *params;
            let mut minus = *params;
            plus[k] += h;
            minus[k] -= h;
            let diff = Self::residuals(&plus, model, image_points, intrinsics)
                - Self::residuals(&minus, model, image_points, intrinsics);
            jac.set_column(k, &(diff / (2.0 * h)));
        }
        jac
    }
}

fn split(params: &Vector6<f64>) -> (Rotation3<f64>, Vector3<f64>) {
    let rvec = Vector3::new(params[0], params[1], params[2]);
    let tvec = Vector3::new(params[3], params[4], params[5]);
    (Rotation3::from_scaled_axis(rvec), tvec)
}

impl HeadPoseSolver for PnpSolver {
    fn solve(
        &self,
        model: &FaceModelPoints,
        image_points: &[Point2<f64>; CORRESPONDENCES],
        intrinsics: &CameraIntrinsics,
        seed: &SolverSeed,
    ) -> Option<SolvedRotation> {
        if !intrinsics.is_valid() || image_points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return None;
        }

        let mut params = Vector6::new(
            seed.rvec.x,
            seed.rvec.y,
            seed.rvec.z,
            seed.tvec.x,
            seed.tvec.y,
            seed.tvec.z,
        );
        let mut cost = Self::residuals(&params, model, image_points, intrinsics).norm_squared();
        let mut damping = INITIAL_DAMPING;
        let mut converged = false;

        for _ in 0..self.settings.max_iterations {
            let residuals = Self::residuals(&params, model, image_points, intrinsics);
            let jac = Self::jacobian(&params, model, image_points, intrinsics);
            let jtj = jac.transpose() * jac;
            let gradient = jac.transpose() * residuals;

            let mut accepted = false;
            while damping <= MAX_DAMPING {
                let mut lhs = jtj;
                for i in 0..6 {
                    lhs[(i, i)] += damping * jtj[(i, i)].max(DIAGONAL_FLOOR);
                }
                let step = lhs.lu().solve(&(-gradient))?;
                let candidate = params + step;
                let candidate_cost =
                    Self::residuals(&candidate, model, image_points, intrinsics).norm_squared();

                if candidate_cost < cost {
                    converged = cost - candidate_cost <= COST_TOLERANCE * cost
                        || step.norm() <= STEP_TOLERANCE * (params.norm() + STEP_TOLERANCE);
                    params = candidate;
                    cost = candidate_cost;
                    damping = (damping / 10.0).max(MIN_DAMPING);
                    accepted = true;
                    break;
                }
                damping *= 10.0;
            }

            // No step lowers the cost any more: we are sitting in a minimum.
            if !accepted {
                converged = true;
            }
            if converged {
                break;
            }
        }

        if !converged || !params.iter().all(|v| v.is_finite()) {
            log::debug!("head-pose solve did not converge: {:?}", params);
            return None;
        }

        let (rotation, translation) = split(&params);
        if model
            .points()
            .iter()
            .any(|p| (rotation * p + translation).z <= 0.0)
        {
            log::debug!("head-pose solve put the face behind the camera");
            return None;
        }

        Some(SolvedRotation {
            rvec: Vector3::new(params[0], params[1], params[2]),
            tvec: Vector3::new(params[3], params[4], params[5]),
            reprojection_error: (cost / CORRESPONDENCES as f64).sqrt(),
        })
    }
}
