use anyhow::Result;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursively collect image files under `directory`.
///
/// Extensions match case-insensitively and may be given with or without a
/// leading dot. Paths are canonicalized so the same file reached through two
/// names (symlinks, `..`) is returned once. The result is sorted.
pub fn discover_images(directory: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let extensions = normalize_extensions(extensions);
    let mut images = BTreeSet::new();

    for entry in WalkDir::new(directory).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();

        if path.is_file() && has_extension(path, &extensions) {
            let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            images.insert(canonical);
        }
    }

    Ok(images.into_iter().collect())
}

/// Lowercase extensions with any leading dot removed
pub fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

/// `extensions` must already be normalized
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    match path.extension() {
        Some(ext) => {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            extensions.iter().any(|e| *e == ext_lower)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn test_discover_images() {
        let dir = tempdir().unwrap();

        File::create(dir.path().join("photo1.jpg")).unwrap();
        File::create(dir.path().join("photo2.PNG")).unwrap();
        File::create(dir.path().join("document.txt")).unwrap();

        fs::create_dir(dir.path().join("subdir")).unwrap();
        File::create(dir.path().join("subdir/photo3.jpeg")).unwrap();

        let extensions = vec!["jpg".to_string(), ".JPEG".to_string(), "png".to_string()];
        let images = discover_images(dir.path(), &extensions).unwrap();

        assert_eq!(images.len(), 3);
        let mut sorted = images.clone();
        sorted.sort();
        assert_eq!(images, sorted);
        assert!(images.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempdir().unwrap();
        let images = discover_images(dir.path(), &["jpg".to_string()]).unwrap();
        assert!(images.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_counted_once() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("a.jpg")).unwrap();
        File::create(dir.path().join("b.png")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("a.jpg"), dir.path().join("a.JPG")).unwrap();

        let extensions = vec!["jpg".to_string(), "png".to_string()];
        let images = discover_images(dir.path(), &extensions).unwrap();

        assert_eq!(images.len(), 2);
        assert!(images[0].ends_with("a.jpg"));
        assert!(images[1].ends_with("b.png"));
    }
}
