//! Application-private staging of user-selected module files.
//!
//! A `StagedInstall` owns its file: it is deleted when the value is consumed
//! by `discard()` or dropped, whichever comes first.
//!
//! Streamed stages land in a private `stage-*` directory under the staging
//! area, so two stages of the same display name never share a path.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::identifier::{encode_file_name, has_module_extension};
use crate::error::{InstallFailure, KpmError, ValidationError};

/// File name used when the source carries no display name.
const FALLBACK_FILE_NAME: &str = "unknown.kpm";

#[derive(Debug)]
pub struct StagedInstall {
    staged_path: Option<PathBuf>,
    /// Per-stage directory, removed together with the file.
    stage_dir: Option<TempDir>,
}

impl StagedInstall {
    /// Takes ownership of a file already in the staging area.
    ///
    /// The file is deleted if its decoded name does not end in `.kpm`.
    pub fn adopt(path: impl Into<PathBuf>) -> Result<Self, ValidationError> {
        let staged = StagedInstall {
            staged_path: Some(path.into()),
            stage_dir: None,
        };
        let file_name = staged.file_name();
        if !has_module_extension(&file_name) {
            log::warn!("[Staging] [REJECT] Not a .kpm module: {}", file_name);
            // Dropping `staged` removes the file
            return Err(ValidationError::WrongExtension(file_name));
        }
        Ok(staged)
    }

    /// Streams `reader` into a fresh directory under `staging_dir`, keeping
    /// the percent-encoded display name as the file name.
    ///
    /// A read or write failure removes the partial file.
    pub fn stage_from_reader<R: Read>(
        staging_dir: &Path,
        display_name: &str,
        reader: &mut R,
    ) -> Result<Self, KpmError> {
        let display_name = match display_name.trim() {
            "" => FALLBACK_FILE_NAME,
            name => name,
        };
        let file_name = encode_file_name(display_name);
        if !has_module_extension(&file_name) {
            log::warn!("[Staging] [REJECT] Not a .kpm module: {}", display_name);
            return Err(ValidationError::WrongExtension(display_name.to_string()).into());
        }

        let stage_dir = fs::create_dir_all(staging_dir)
            .and_then(|()| {
                tempfile::Builder::new()
                    .prefix("stage-")
                    .tempdir_in(staging_dir)
            })
            .map_err(|e| {
                InstallFailure::SourceUnreadable(format!(
                    "cannot create staging directory in {}: {}",
                    staging_dir.display(),
                    e
                ))
            })?;

        let staged_path = stage_dir.path().join(&file_name);
        // Owning the path first means a failed copy still cleans up
        let staged = StagedInstall {
            staged_path: Some(staged_path.clone()),
            stage_dir: Some(stage_dir),
        };

        let copied = File::create(&staged_path).and_then(|mut file| io::copy(reader, &mut file));
        match copied {
            Ok(bytes) => {
                log::debug!(
                    "[Staging] Staged {} bytes at {}",
                    bytes,
                    staged_path.display()
                );
                Ok(staged)
            }
            Err(e) => {
                log::warn!(
                    "[Staging] [ERROR] Failed to copy '{}' into staging: {}",
                    display_name,
                    e
                );
                Err(InstallFailure::SourceUnreadable(e.to_string()).into())
            }
        }
    }

    /// Copies an on-disk file into `staging_dir`.
    pub fn stage_from_path(staging_dir: &Path, source: &Path) -> Result<Self, KpmError> {
        let display_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut file = File::open(source).map_err(|e| {
            InstallFailure::SourceUnreadable(format!("{}: {}", source.display(), e))
        })?;
        Self::stage_from_reader(staging_dir, &display_name, &mut file)
    }

    pub fn path(&self) -> &Path {
        self.staged_path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// The staged file name as stored, still percent-encoded.
    pub fn file_name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Cancels the install and removes the staged file now.
    pub fn discard(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let Some(path) = self.staged_path.take() {
            match fs::remove_file(&path) {
                Ok(()) => log::debug!("[Staging] Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    "[Staging] [WARN] Could not remove staged file {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        if let Some(stage_dir) = self.stage_dir.take() {
            let dir = stage_dir.path().to_path_buf();
            if let Err(e) = stage_dir.close() {
                log::warn!(
                    "[Staging] [WARN] Could not remove stage directory {}: {}",
                    dir.display(),
                    e
                );
            }
        }
    }
}

impl Drop for StagedInstall {
    fn drop(&mut self) {
        self.remove();
    }
}
