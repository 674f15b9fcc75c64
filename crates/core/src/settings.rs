use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::PermissionProfile;

pub const SETTINGS_FILE_NAME: &str = ".clean_files";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write default settings to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("permission profile '{value}' must be 9 symbolic characters (e.g. rw-r--r--) or 3 octal digits (e.g. 644)")]
    InvalidPermissions { value: String },
    #[error("substitute '{value}' must be exactly one character")]
    InvalidSubstitute { value: String },
    #[error("substitute '{value}' is itself listed as a troublesome character")]
    SubstituteIsTroublesome { value: char },
    #[error("substitute '{value}' cannot be used inside a file name")]
    SubstituteIsSeparator { value: char },
    #[error("could not determine the home directory for the default settings file")]
    NoHomeDirectory,
}

/// On-disk shape of the settings file. Every field falls back to its default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingsFile {
    #[serde(default = "default_suggested_permissions")]
    pub suggested_permissions: String,
    #[serde(default = "default_troublesome_chars")]
    pub troublesome_chars: String,
    #[serde(default = "default_char_substitute")]
    pub char_substitute: String,
    #[serde(default = "default_temp_extensions")]
    pub temp_extensions: Vec<String>,
}

fn default_suggested_permissions() -> String {
    "rw-r--r--".to_string()
}

fn default_troublesome_chars() -> String {
    ":;*?\"$#`|\\.".to_string()
}

fn default_char_substitute() -> String {
    "_".to_string()
}

fn default_temp_extensions() -> Vec<String> {
    [".tmp", "~", ".bak", ".DS_Store"]
        .iter()
        .map(|value| value.to_string())
        .collect()
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self {
            suggested_permissions: default_suggested_permissions(),
            troublesome_chars: default_troublesome_chars(),
            char_substitute: default_char_substitute(),
            temp_extensions: default_temp_extensions(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub permissions: PermissionProfile,
    pub troublesome_chars: BTreeSet<char>,
    pub substitute: char,
    pub temp_suffixes: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            permissions: PermissionProfile::from_mode(0o644),
            troublesome_chars: default_troublesome_chars().chars().collect(),
            substitute: '_',
            temp_suffixes: default_temp_extensions(),
        }
    }
}

impl TryFrom<SettingsFile> for Settings {
    type Error = SettingsError;

    fn try_from(file: SettingsFile) -> Result<Self, Self::Error> {
        let permissions = PermissionProfile::parse(&file.suggested_permissions)?;

        let mut substitute_chars = file.char_substitute.chars();
        let substitute = match (substitute_chars.next(), substitute_chars.next()) {
            (Some(ch), None) => ch,
            _ => {
                return Err(SettingsError::InvalidSubstitute {
                    value: file.char_substitute,
                })
            }
        };
        if substitute == '/' || substitute == '\0' {
            return Err(SettingsError::SubstituteIsSeparator { value: substitute });
        }

        let troublesome_chars = file.troublesome_chars.chars().collect::<BTreeSet<_>>();
        if troublesome_chars.contains(&substitute) {
            return Err(SettingsError::SubstituteIsTroublesome { value: substitute });
        }

        let temp_suffixes = file
            .temp_extensions
            .iter()
            .map(|suffix| suffix.trim().to_string())
            .filter(|suffix| !suffix.is_empty())
            .collect();

        Ok(Self {
            permissions,
            troublesome_chars,
            substitute,
            temp_suffixes,
        })
    }
}

impl From<&Settings> for SettingsFile {
    fn from(settings: &Settings) -> Self {
        Self {
            suggested_permissions: settings.permissions.as_symbolic(),
            troublesome_chars: settings.troublesome_chars.iter().collect(),
            char_substitute: settings.substitute.to_string(),
            temp_extensions: settings.temp_suffixes.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub path: PathBuf,
    pub settings: Settings,
    pub created_default: bool,
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    dirs::home_dir()
        .map(|home| home.join(SETTINGS_FILE_NAME))
        .ok_or(SettingsError::NoHomeDirectory)
}

/// Reads the settings file, writing the defaults first when it does not exist yet.
pub fn load_or_init(path: &Path) -> Result<LoadedSettings, SettingsError> {
    if !path.exists() {
        let defaults = SettingsFile::default();
        let payload = serde_json::to_string_pretty(&defaults).map_err(|source| {
            SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, payload).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        warn!(
            "settings file {} not found; wrote defaults and continuing with them",
            path.display()
        );
        return Ok(LoadedSettings {
            path: path.to_path_buf(),
            settings: Settings::try_from(defaults)?,
            created_default: true,
        });
    }

    let data = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: SettingsFile = serde_json::from_str(&data).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let settings = Settings::try_from(file)?;
    info!(
        "loaded settings from {} (target permissions {})",
        path.display(),
        settings.permissions.as_symbolic()
    );

    Ok(LoadedSettings {
        path: path.to_path_buf(),
        settings,
        created_default: false,
    })
}
