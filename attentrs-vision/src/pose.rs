//! Single-person keypoint estimation.
//!
//! Wraps a MoveNet-style single-pose ONNX model: input `[1, S, S, 3]` int32 RGB,
//! output `[1, 1, 17, 3]` holding `(y, x, score)` per keypoint, normalized to
//! the square input.

use std::path::Path;

use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use nalgebra::Point2;
use ndarray::Array4;
use ort::{session::Session, value::Value};
use serde::{Deserialize, Serialize};

use crate::geometry::FaceLandmarks;

/// Body landmarks, camera-relative: `LeftEye` is the eye on the left of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl Part {
    /// Model output order.
    pub const ALL: [Part; 17] = [
        Part::Nose,
        Part::LeftEye,
        Part::RightEye,
        Part::LeftEar,
        Part::RightEar,
        Part::LeftShoulder,
        Part::RightShoulder,
        Part::LeftElbow,
        Part::RightElbow,
        Part::LeftWrist,
        Part::RightWrist,
        Part::LeftHip,
        Part::RightHip,
        Part::LeftKnee,
        Part::RightKnee,
        Part::LeftAnkle,
        Part::RightAnkle,
    ];

    /// The same landmark on the other side of the body.
    pub fn mirrored(self) -> Part {
        match self {
            Part::Nose => Part::Nose,
            Part::LeftEye => Part::RightEye,
            Part::RightEye => Part::LeftEye,
            Part::LeftEar => Part::RightEar,
            Part::RightEar => Part::LeftEar,
            Part::LeftShoulder => Part::RightShoulder,
            Part::RightShoulder => Part::LeftShoulder,
            Part::LeftElbow => Part::RightElbow,
            Part::RightElbow => Part::LeftElbow,
            Part::LeftWrist => Part::RightWrist,
            Part::RightWrist => Part::LeftWrist,
            Part::LeftHip => Part::RightHip,
            Part::RightHip => Part::LeftHip,
            Part::LeftKnee => Part::RightKnee,
            Part::RightKnee => Part::LeftKnee,
            Part::LeftAnkle => Part::RightAnkle,
            Part::RightAnkle => Part::LeftAnkle,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keypoint {
    pub part: Part,
    /// Frame pixel coordinates.
    pub position: Point2<f32>,
    pub score: f32,
}

/// One frame's worth of keypoints. Nothing is filtered by confidence here.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    pub score: f32,
    pub keypoints: Vec<Keypoint>,
}

impl PoseEstimate {
    /// Overall score is the mean keypoint score.
    pub fn from_keypoints(keypoints: Vec<Keypoint>) -> Self {
        let score = if keypoints.is_empty() {
            0.0
        } else {
            keypoints.iter().map(|k| k.score).sum::<f32>() / keypoints.len() as f32
        };
        Self { score, keypoints }
    }

    pub fn find(&self, part: Part) -> Option<&Keypoint> {
        self.keypoints.iter().find(|k| k.part == part)
    }

    /// Nose and both eyes, if all three are present.
    pub fn face_landmarks(&self) -> Option<FaceLandmarks> {
        let point = |part| {
            self.find(part)
                .map(|k| Point2::new(k.position.x as f64, k.position.y as f64))
        };
        Some(FaceLandmarks {
            nose: point(Part::Nose)?,
            left_eye: point(Part::LeftEye)?,
            right_eye: point(Part::RightEye)?,
        })
    }
}

/// Produces keypoints for a frame. Frames are never mirrored.
pub trait PoseEstimator {
    fn estimate(&mut self, frame: &RgbImage) -> Result<PoseEstimate>;
}

/// Aspect-preserving fit of a frame into a square model input, centered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub size: u32,
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, size: u32) -> Self {
        let max_dim = width.max(height).max(1);
        let scale = size as f32 / max_dim as f32;
        let width = ((width as f32 * scale) as u32).clamp(1, size);
        let height = ((height as f32 * scale) as u32).clamp(1, size);
        Self {
            size,
            scale,
            offset_x: (size - width) / 2,
            offset_y: (size - height) / 2,
            width,
            height,
        }
    }

    pub fn apply(&self, frame: &RgbImage) -> RgbImage {
        let resized = imageops::resize(frame, self.width, self.height, imageops::FilterType::Triangle);
        let mut canvas = RgbImage::new(self.size, self.size);
        imageops::overlay(
            &mut canvas,
            &resized,
            self.offset_x as i64,
            self.offset_y as i64,
        );
        canvas
    }

    /// Map normalized canvas coordinates back to frame pixels.
    pub fn to_frame(&self, x: f32, y: f32) -> Point2<f32> {
        let size = self.size as f32;
        Point2::new(
            (x * size - self.offset_x as f32) / self.scale,
            (y * size - self.offset_y as f32) / self.scale,
        )
    }
}

/// Decode a `[1, 1, 17, 3]` `(y, x, score)` tensor into a frame-space estimate.
///
/// The model labels sides from the subject's point of view; on an unflipped
/// frame that is the opposite of the camera's, so every lateral part is
/// swapped.
pub fn decode_single_pose(shape: &[i64], data: &[f32], letterbox: &Letterbox) -> Result<PoseEstimate> {
    let parts = Part::ALL.len();
    if shape != [1, 1, parts as i64, 3] {
        anyhow::bail!(
            "Unexpected pose output shape {:?}, expected [1, 1, {}, 3]",
            shape,
            parts
        );
    }
    if data.len() < parts * 3 {
        anyhow::bail!("Short pose output: {} values", data.len());
    }

    let keypoints = Part::ALL
        .iter()
        .zip(data.chunks_exact(3))
        .map(|(&part, v)| Keypoint {
            part: part.mirrored(),
            position: letterbox.to_frame(v[1], v[0]),
            score: v[2],
        })
        .collect();

    Ok(PoseEstimate::from_keypoints(keypoints))
}

pub fn check_input_size(input_size: u32) -> Result<()> {
    if input_size == 0 {
        anyhow::bail!("pose model input size must be positive");
    }
    Ok(())
}

/// ONNX single-pose model.
pub struct SinglePoseModel {
    session: Session,
    input_size: u32,
}

impl SinglePoseModel {
    pub const DEFAULT_INPUT_SIZE: u32 = 192;

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            session: crate::model::pose_session(path)?,
            input_size: Self::DEFAULT_INPUT_SIZE,
        })
    }

    /// Override the square input side (e.g. 256 for MoveNet Thunder).
    pub fn with_input_size(mut self, input_size: u32) -> Result<Self> {
        check_input_size(input_size)?;
        self.input_size = input_size;
        Ok(self)
    }
}

impl PoseEstimator for SinglePoseModel {
    fn estimate(&mut self, frame: &RgbImage) -> Result<PoseEstimate> {
        let letterbox = Letterbox::fit(frame.width(), frame.height(), self.input_size);
        let canvas = letterbox.apply(frame);
        let size = self.input_size as usize;

        let input: Vec<i32> = canvas.as_raw().iter().map(|&v| v as i32).collect();
        let input_array = Array4::from_shape_vec((1, size, size, 3), input)?;
        let input_tensor = Value::from_array(input_array)?;

        let outputs = self
            .session
            .run(ort::inputs![input_tensor])
            .context("running pose model")?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let shape_vec: Vec<i64> = shape.iter().copied().collect();

        let estimate = decode_single_pose(&shape_vec, data, &letterbox)?;
        log::debug!(
            "pose estimate: score={:.3} keypoints={}",
            estimate.score,
            estimate.keypoints.len()
        );
        Ok(estimate)
    }
}
