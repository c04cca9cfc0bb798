use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::scanner::discovery::{has_extension, normalize_extensions};

/// One reference image for a named identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub name: String,
    pub path: PathBuf,
}

/// List reference images under `root`.
///
/// Each immediate subfolder is one identity named after the folder. Image
/// files directly inside it are returned; deeper folders are ignored.
/// Identities and their files come back in sorted order.
pub fn discover_reference_images(root: &Path, extensions: &[String]) -> Result<Vec<ReferenceImage>> {
    if !root.is_dir() {
        return Err(PipelineError::DirectoryNotFound {
            path: root.to_path_buf(),
        }
        .into());
    }

    let extensions = normalize_extensions(extensions);

    let mut identities: Vec<PathBuf> = std::fs::read_dir(root)
        .with_context(|| format!("Cannot read {}", root.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    identities.sort();

    let mut images = Vec::new();
    for dir in identities {
        let name = match dir.file_name() {
            Some(n) => n.to_string_lossy().to_string(),
            None => continue,
        };

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .with_context(|| format!("Cannot read {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && has_extension(p, &extensions))
            .collect();
        files.sort();

        for path in files {
            let path = path.canonicalize().unwrap_or(path);
            images.push(ReferenceImage {
                name: name.clone(),
                path,
            });
        }
    }

    Ok(images)
}
