use std::path::Path;

use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

/// Load the single-pose keypoint model from disk.
pub fn pose_session(path: &Path) -> Result<Session> {
    if !path.exists() {
        anyhow::bail!("pose model not found at {}", path.display());
    }
    log::info!("Loading pose model from {}", path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load pose model {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_an_error() {
        let err = pose_session(Path::new("/nonexistent/movenet.onnx")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
