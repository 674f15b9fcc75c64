use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{PermissionProfile, SuggestedAction, Suggestion, SuggestionKind};

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExecutionFailure {
    #[error("{} no longer exists", .path.display())]
    TargetVanished { path: PathBuf },
    #[error("permission denied while applying {action} to {}", .path.display())]
    PermissionDenied {
        path: PathBuf,
        action: SuggestedAction,
    },
    #[error("destination {} already exists", .destination.display())]
    DestinationExists { destination: PathBuf },
    #[error("{action} on {} has no destination path", .path.display())]
    MissingDestination {
        path: PathBuf,
        action: SuggestedAction,
    },
    #[error("suggestion kind {kind} is not supported by this build")]
    Unsupported { kind: SuggestionKind },
    #[error("{action} on {} failed: {detail}", .path.display())]
    Other {
        path: PathBuf,
        action: SuggestedAction,
        detail: String,
    },
}

impl ExecutionFailure {
    fn from_io(err: io::Error, path: &Path, action: SuggestedAction) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ExecutionFailure::TargetVanished {
                path: path.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => ExecutionFailure::PermissionDenied {
                path: path.to_path_buf(),
                action,
            },
            _ => ExecutionFailure::Other {
                path: path.to_path_buf(),
                action,
                detail: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Applied,
    Failed { failure: ExecutionFailure },
}

impl ExecutionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ExecutionOutcome::Applied)
    }
}

/// Applies approved suggestions to the file system. Failures are reported, never raised.
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    permissions: PermissionProfile,
}

impl Executor {
    pub fn new(permissions: PermissionProfile) -> Self {
        Self { permissions }
    }

    pub fn apply(&self, suggestion: &Suggestion) -> ExecutionOutcome {
        match self.try_apply(suggestion) {
            Ok(()) => {
                info!(
                    "{} {} applied to {}",
                    suggestion.kind,
                    suggestion.action,
                    suggestion.subject_path.display()
                );
                ExecutionOutcome::Applied
            }
            Err(failure) => {
                warn!("{} {} failed: {failure}", suggestion.kind, suggestion.action);
                ExecutionOutcome::Failed { failure }
            }
        }
    }

    /// Moves a file outside of any suggestion, as the flattening pass does.
    pub fn relocate(&self, source: &Path, destination: &Path) -> Result<(), ExecutionFailure> {
        let result = move_file(source, destination);
        match &result {
            Ok(()) => info!("moved {} -> {}", source.display(), destination.display()),
            Err(failure) => warn!("move failed: {failure}"),
        }
        result
    }

    pub fn try_apply(&self, suggestion: &Suggestion) -> Result<(), ExecutionFailure> {
        if suggestion.kind == SuggestionKind::Unrecognized {
            return Err(ExecutionFailure::Unsupported {
                kind: suggestion.kind,
            });
        }

        let path = suggestion.subject_path.as_path();
        match suggestion.action {
            SuggestedAction::Delete => fs::remove_file(path)
                .map_err(|err| ExecutionFailure::from_io(err, path, SuggestedAction::Delete)),
            SuggestedAction::Rename => rename_file(path, destination_of(suggestion)?),
            SuggestedAction::Move => move_file(path, destination_of(suggestion)?),
            SuggestedAction::Chmod => set_permissions(path, self.permissions),
        }
    }
}

fn destination_of(suggestion: &Suggestion) -> Result<&Path, ExecutionFailure> {
    suggestion
        .destination_path
        .as_deref()
        .ok_or_else(|| ExecutionFailure::MissingDestination {
            path: suggestion.subject_path.clone(),
            action: suggestion.action,
        })
}

fn ensure_present(path: &Path, action: SuggestedAction) -> Result<(), ExecutionFailure> {
    fs::symlink_metadata(path)
        .map(|_| ())
        .map_err(|err| ExecutionFailure::from_io(err, path, action))
}

fn ensure_vacant(destination: &Path) -> Result<(), ExecutionFailure> {
    if fs::symlink_metadata(destination).is_ok() {
        return Err(ExecutionFailure::DestinationExists {
            destination: destination.to_path_buf(),
        });
    }
    Ok(())
}

/// In-place rename. The destination's directory must already exist.
pub fn rename_file(source: &Path, destination: &Path) -> Result<(), ExecutionFailure> {
    ensure_present(source, SuggestedAction::Rename)?;
    ensure_vacant(destination)?;
    fs::rename(source, destination)
        .map_err(|err| ExecutionFailure::from_io(err, source, SuggestedAction::Rename))
}

/// Moves a file, creating missing parent directories of the destination. Never overwrites.
pub fn move_file(source: &Path, destination: &Path) -> Result<(), ExecutionFailure> {
    ensure_present(source, SuggestedAction::Move)?;
    ensure_vacant(destination)?;
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| ExecutionFailure::from_io(err, parent, SuggestedAction::Move))?;
    }

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(ExecutionFailure::from_io(err, source, SuggestedAction::Move))
        }
        Err(rename_err) => {
            debug!(
                "rename {} -> {} failed ({rename_err}); copying instead",
                source.display(),
                destination.display()
            );
            copy_then_remove(source, destination)
        }
    }
}

fn copy_then_remove(source: &Path, destination: &Path) -> Result<(), ExecutionFailure> {
    fs::copy(source, destination)
        .map_err(|err| ExecutionFailure::from_io(err, source, SuggestedAction::Move))?;
    if let Err(err) = fs::remove_file(source) {
        // Leave exactly one copy behind.
        let _ = fs::remove_file(destination);
        return Err(ExecutionFailure::from_io(err, source, SuggestedAction::Move));
    }
    Ok(())
}

pub fn set_permissions(path: &Path, profile: PermissionProfile) -> Result<(), ExecutionFailure> {
    let metadata = fs::metadata(path)
        .map_err(|err| ExecutionFailure::from_io(err, path, SuggestedAction::Chmod))?;

    #[cfg(unix)]
    let permissions = {
        use std::os::unix::fs::PermissionsExt;
        let _ = metadata;
        fs::Permissions::from_mode(profile.mode())
    };

    #[cfg(not(unix))]
    let permissions = {
        let mut permissions = metadata.permissions();
        permissions.set_readonly(!profile.owner_can_write());
        permissions
    };

    fs::set_permissions(path, permissions)
        .map_err(|err| ExecutionFailure::from_io(err, path, SuggestedAction::Chmod))
}
