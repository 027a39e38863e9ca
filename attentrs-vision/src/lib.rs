pub mod attention;
pub mod geometry;
pub mod model;
pub mod pipeline;
pub mod pose;
pub mod video;

// Re-export commonly used types
pub use attention::{AttentionClassifier, AttentionThresholds, Reason, Verdict};
pub use geometry::{
    CameraIntrinsics, FaceLandmarks, FaceModelPoints, HeadPoseSolver, PnpSolver, SolvedRotation,
    SolverSeed, SolverSettings,
};
pub use pipeline::FramePipeline;
pub use pose::{Keypoint, Part, PoseEstimate, PoseEstimator, SinglePoseModel};
pub use video::{Camera, VideoSource};
