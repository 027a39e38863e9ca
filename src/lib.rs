pub mod config;
pub mod detector;
pub mod report;
pub mod session;
pub mod stats;

pub use detector::{AttentionDetector, DetectorSettings};
pub use report::{AttentionReport, HttpReporter, ReportError, ReportPolicy, ReportSink};
pub use session::{AuthContext, ClassId};
pub use stats::{AttentionStats, StatsClient, StatsError};

// Re-export vision types for convenience
pub use attentrs_vision::{
    pipeline, pose, video, AttentionClassifier, AttentionThresholds, FramePipeline, PoseEstimate,
    Reason, SinglePoseModel, Verdict,
};
