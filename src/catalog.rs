//! Finished recordings on disk

use std::path::{Path, PathBuf};

use crate::error::{RecorderError, Result};
use crate::screencast::{RECORDING_EXTENSION, RecordingArtifact};

/// Lists and deletes the recordings in one directory
#[derive(Debug, Clone)]
pub struct RecordingsCatalog {
    dir: PathBuf,
}

impl RecordingsCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All recordings, newest first
    ///
    /// Durations are not probed from the container and are reported as 0.
    pub fn list(&self) -> Result<Vec<RecordingArtifact>> {
        std::fs::create_dir_all(&self.dir).map_err(RecorderError::list_failed)?;

        let mut recordings = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(RecorderError::list_failed)? {
            let path = entry.map_err(RecorderError::list_failed)?.path();
            if !path.is_file() || !is_recording_file(&path) {
                continue;
            }
            match RecordingArtifact::from_file(&path, 0.0) {
                Ok(artifact) => recordings.push(artifact),
                Err(err) => log::warn!("Skipping unreadable recording {}: {}", path.display(), err),
            }
        }

        recordings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        log::debug!(
            "Found {} recordings in {}",
            recordings.len(),
            self.dir.display()
        );
        Ok(recordings)
    }

    /// Delete the recording with the given id (file name without extension)
    pub fn delete(&self, id: &str) -> Result<()> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(RecorderError::FileNotFound(id.to_string()));
        }

        let path = self.dir.join(format!("{id}.{RECORDING_EXTENSION}"));
        if !path.is_file() {
            return Err(RecorderError::FileNotFound(id.to_string()));
        }

        std::fs::remove_file(&path).map_err(|err| RecorderError::delete_failed(id, err))?;
        log::info!("Deleted recording: {}", path.display());
        Ok(())
    }
}

fn is_recording_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(RECORDING_EXTENSION))
}
