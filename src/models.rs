//! ONNX model files: on-demand download and session setup.

use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;

use crate::error::PipelineError;

/// Make sure `path` exists, downloading it from `url` when missing.
pub fn ensure_model(path: &Path, url: Option<&str>) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let url = url.ok_or_else(|| PipelineError::ModelUnavailable {
        name: name.clone(),
        reason: format!("{} does not exist and no download URL is configured", path.display()),
    })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(model = %name, url, "Downloading model...");
    let response = ureq::get(url).call().map_err(|e| PipelineError::ModelUnavailable {
        name: name.clone(),
        reason: format!("download failed: {}", e),
    })?;

    // A partial download never lands at `path`
    let partial = path.with_extension("part");
    {
        let mut file = std::fs::File::create(&partial)
            .with_context(|| format!("Cannot create {}", partial.display()))?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
    }
    std::fs::rename(&partial, path)?;

    tracing::info!(model = %name, path = ?path, "Model downloaded");
    Ok(())
}

/// Build an inference session for the model at `path`.
pub fn open_session(path: &Path) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(path)
        .map_err(|e| PipelineError::ModelUnavailable {
            name: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_model_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"weights").unwrap();

        ensure_model(&path, None).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"weights");
    }

    #[test]
    fn test_missing_model_without_url() {
        let dir = tempfile::tempdir().unwrap();
        let err = ensure_model(&dir.path().join("yolo.onnx"), None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ModelUnavailable { name, .. }) if name == "yolo.onnx"
        ));
    }
}
