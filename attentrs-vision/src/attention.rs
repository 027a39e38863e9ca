//! Attentiveness heuristics over one frame's pose estimate.

use serde::{Deserialize, Serialize};

use crate::geometry::{CameraIntrinsics, FaceModelPoints, HeadPoseSolver, SolvedRotation, SolverSeed};
use crate::pose::PoseEstimate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionThresholds {
    /// Below this overall pose score nobody is considered present.
    pub min_pose_confidence: f32,
    /// Primary-axis rotation (degrees) past which the head counts as turned away.
    pub max_turn_degrees: f64,
    /// Secondary-axis rotation (degrees) below which the head counts as tilted up.
    pub top_tilt_degrees: f64,
}

impl Default for AttentionThresholds {
    fn default() -> Self {
        Self {
            min_pose_confidence: 0.1,
            max_turn_degrees: 75.0,
            top_tilt_degrees: -130.0,
        }
    }
}

/// Why a verdict came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    NobodyPresent,
    Facing,
    TurnedRight,
    TurnedLeft,
    TiltedUp,
    SolveFailed,
    PartialLandmarks,
}

impl Reason {
    pub fn is_attentive(self) -> bool {
        matches!(
            self,
            Reason::Facing | Reason::SolveFailed | Reason::PartialLandmarks
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub attentive: bool,
    pub reason: Reason,
    pub rotation: Option<SolvedRotation>,
}

impl Verdict {
    fn new(reason: Reason, rotation: Option<SolvedRotation>) -> Self {
        Self {
            attentive: reason.is_attentive(),
            reason,
            rotation,
        }
    }

    /// Whether the verdict is backed by a successful head-pose solve.
    pub fn is_solved(&self) -> bool {
        self.rotation.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttentionClassifier {
    thresholds: AttentionThresholds,
}

impl AttentionClassifier {
    pub fn new(thresholds: AttentionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AttentionThresholds {
        &self.thresholds
    }

    /// Classify one frame. Rules apply in order, first match wins.
    pub fn classify<S: HeadPoseSolver + ?Sized>(
        &self,
        estimate: &PoseEstimate,
        solver: &S,
        model: &FaceModelPoints,
        intrinsics: &CameraIntrinsics,
    ) -> Verdict {
        if estimate.score < self.thresholds.min_pose_confidence {
            log::debug!("no one present (score {:.3})", estimate.score);
            return Verdict::new(Reason::NobodyPresent, None);
        }

        let Some(landmarks) = estimate.face_landmarks() else {
            return Verdict::new(Reason::PartialLandmarks, None);
        };

        let seed = SolverSeed::for_landmarks(&landmarks);
        match solver.solve(model, &landmarks.image_points(), intrinsics, &seed) {
            Some(rotation) => {
                let reason = self.judge_rotation(&rotation);
                log::debug!("rotation {:?} deg -> {:?}", rotation.degrees(), reason);
                Verdict::new(reason, Some(rotation))
            }
            None => Verdict::new(Reason::SolveFailed, None),
        }
    }

    /// Threshold checks on a solved rotation alone.
    pub fn judge_rotation(&self, rotation: &SolvedRotation) -> Reason {
        let deg = rotation.degrees();
        if deg[0] > self.thresholds.max_turn_degrees {
            Reason::TurnedRight
        } else if deg[0] < -self.thresholds.max_turn_degrees {
            Reason::TurnedLeft
        } else if deg[1] < self.thresholds.top_tilt_degrees {
            Reason::TiltedUp
        } else {
            Reason::Facing
        }
    }
}
