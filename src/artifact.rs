//! Artifact storage: writing fetched images to the working directory.
//!
//! Every artifact is named `image_<index><ext>`, where `<index>` is the
//! item's original batch position. Consumers rely on these names, so the
//! convention must not change. The store also knows how to clear leftover
//! artifacts from a prior run; only files matching the artifact pattern are
//! touched, never unrelated files in the same directory.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use url::Url;

/// Filename prefix shared by all artifacts.
const ARTIFACT_PREFIX: &str = "image_";

/// Image extensions the store recognizes, in artifact-pattern matching and
/// URL extension derivation. Lowercase, dot included.
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];

/// Extension used when the URL does not reveal one.
const DEFAULT_EXTENSION: &str = ".jpg";

/// Errors that can occur while writing or validating an artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// File system error (create file, write, enumerate, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The written file is missing or empty.
    #[error("saved file is invalid or empty: {path}")]
    Empty {
        /// The path that failed validation.
        path: PathBuf,
    },
}

impl ArtifactError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a validation error for a missing or empty file.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self::Empty { path: path.into() }
    }
}

/// Derives the artifact extension from the URL path.
///
/// Falls back to `.jpg` when the path has no recognizable image extension
/// (query strings and fragments are ignored by `Url::path`).
#[must_use]
pub fn extension_for(url: &Url) -> &'static str {
    let path = url.path().to_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .find(|ext| path.ends_with(*ext))
        .copied()
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Writes artifacts into a working directory and validates the result.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// the first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the working directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `bytes` to `image_<index><ext>` and validates the result.
    ///
    /// The target is truncated if it already exists. After the write the
    /// file must exist and be non-empty; otherwise the invalid artifact is
    /// removed and [`ArtifactError::Empty`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] when the directory or file cannot be
    /// created or written, and [`ArtifactError::Empty`] when validation
    /// fails (including a zero-byte input).
    #[instrument(skip(self, bytes), fields(dir = %self.dir.display(), bytes = bytes.len()))]
    pub async fn write(
        &self,
        index: usize,
        ext: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, ArtifactError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ArtifactError::io(self.dir.clone(), e))?;

        let path = self.dir.join(format!("{ARTIFACT_PREFIX}{index}{ext}"));

        let mut file = File::create(&path)
            .await
            .map_err(|e| ArtifactError::io(path.clone(), e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| ArtifactError::io(path.clone(), e))?;
        file.flush()
            .await
            .map_err(|e| ArtifactError::io(path.clone(), e))?;
        drop(file);

        let valid = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        if !valid {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(ArtifactError::empty(path));
        }

        debug!(path = %path.display(), "artifact written");
        Ok(path)
    }

    /// Removes leftover artifacts from the working directory.
    ///
    /// Only files matching `image_<digits>.<image-ext>` are removed. Returns
    /// the number of files deleted; a missing directory counts as zero.
    /// Individual removal failures are logged and skipped so one stuck file
    /// does not block a new run.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] when the directory cannot be read.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn clear(&self) -> Result<usize, ArtifactError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ArtifactError::io(self.dir.clone(), e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ArtifactError::io(self.dir.clone(), e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_artifact_name(name) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!(file = name, "removed stale artifact");
                    removed += 1;
                }
                Err(e) => {
                    warn!(file = name, error = %e, "failed to remove stale artifact");
                }
            }
        }

        Ok(removed)
    }
}

/// Returns true when `name` matches the artifact pattern
/// `image_<digits>.<image-ext>`.
fn is_artifact_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(ARTIFACT_PREFIX) else {
        return false;
    };
    let Some(dot) = rest.find('.') else {
        return false;
    };
    let (digits, ext) = rest.split_at(dot);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}
