use anyhow::{Context, Result};
use image::RgbImage;

use crate::attention::{AttentionClassifier, Verdict};
use crate::geometry::{CameraIntrinsics, FaceModelPoints, HeadPoseSolver, PnpSolver};
use crate::pose::PoseEstimator;

/// Full per-frame pipeline: estimate keypoints → solve head pose → classify
pub struct FramePipeline<E, S = PnpSolver> {
    pub estimator: E,
    pub solver: S,
    pub classifier: AttentionClassifier,
    pub intrinsics: CameraIntrinsics,
    pub model: FaceModelPoints,
}

impl<E: PoseEstimator, S: HeadPoseSolver> FramePipeline<E, S> {
    pub fn new(
        estimator: E,
        solver: S,
        classifier: AttentionClassifier,
        intrinsics: CameraIntrinsics,
    ) -> Self {
        Self {
            estimator,
            solver,
            classifier,
            intrinsics,
            model: FaceModelPoints::standard(),
        }
    }

    /// Run one frame through the pipeline.
    pub fn process(&mut self, frame: &RgbImage) -> Result<Verdict> {
        let estimate = self
            .estimator
            .estimate(frame)
            .context("estimating pose")?;

        Ok(self
            .classifier
            .classify(&estimate, &self.solver, &self.model, &self.intrinsics))
    }
}
