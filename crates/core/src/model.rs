use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::SettingsError;

pub const PLAN_VERSION: &str = "1.0.0";

/// One scanned file. Records are produced by the scanner and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryRecord {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub permissions: PermissionProfile,
    pub fingerprint: Fingerprint,
}

impl InventoryRecord {
    pub fn file_name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }

    pub fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }

    pub fn is_within(&self, dir: &Path) -> bool {
        self.path.starts_with(dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Fingerprint {
    Digest { hex: String },
    Unreadable { reason: String },
}

impl Fingerprint {
    pub fn digest(&self) -> Option<&str> {
        match self {
            Fingerprint::Digest { hex } => Some(hex),
            Fingerprint::Unreadable { .. } => None,
        }
    }

    pub fn is_unreadable(&self) -> bool {
        matches!(self, Fingerprint::Unreadable { .. })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Digest { hex } => f.write_str(hex),
            Fingerprint::Unreadable { reason } => write!(f, "unreadable ({reason})"),
        }
    }
}

/// Owner/group/other rwx levels, each in `0..=7`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionProfile {
    owner: u8,
    group: u8,
    other: u8,
}

impl PermissionProfile {
    pub const fn new(owner: u8, group: u8, other: u8) -> Self {
        Self {
            owner: owner & 0o7,
            group: group & 0o7,
            other: other & 0o7,
        }
    }

    pub const fn from_mode(mode: u32) -> Self {
        Self::new(
            ((mode >> 6) & 0o7) as u8,
            ((mode >> 3) & 0o7) as u8,
            (mode & 0o7) as u8,
        )
    }

    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            Self::from_mode(metadata.permissions().mode())
        }

        #[cfg(not(unix))]
        {
            if metadata.permissions().readonly() {
                Self::from_mode(0o444)
            } else {
                Self::from_mode(0o666)
            }
        }
    }

    /// Accepts `rw-r--r--` style symbolic strings or three octal digits such as `644`.
    pub fn parse(value: &str) -> Result<Self, SettingsError> {
        let trimmed = value.trim();
        let invalid = || SettingsError::InvalidPermissions {
            value: value.to_string(),
        };

        if trimmed.len() == 3 && trimmed.chars().all(|ch| ('0'..='7').contains(&ch)) {
            let mode = u32::from_str_radix(trimmed, 8).map_err(|_| invalid())?;
            return Ok(Self::from_mode(mode));
        }

        let chars = trimmed.chars().collect::<Vec<_>>();
        if chars.len() != 9 {
            return Err(invalid());
        }

        let mut levels = [0_u8; 3];
        for (slot, triad) in chars.chunks(3).enumerate() {
            let mut level = 0_u8;
            for (ch, (letter, bit)) in triad.iter().zip([('r', 4_u8), ('w', 2), ('x', 1)]) {
                match *ch {
                    '-' => {}
                    c if c == letter => level |= bit,
                    _ => return Err(invalid()),
                }
            }
            levels[slot] = level;
        }

        Ok(Self::new(levels[0], levels[1], levels[2]))
    }

    pub const fn mode(&self) -> u32 {
        ((self.owner as u32) << 6) | ((self.group as u32) << 3) | self.other as u32
    }

    pub fn as_octal(&self) -> String {
        format!("{}{}{}", self.owner, self.group, self.other)
    }

    pub fn as_symbolic(&self) -> String {
        [self.owner, self.group, self.other]
            .iter()
            .flat_map(|level| {
                [(4_u8, 'r'), (2, 'w'), (1, 'x')]
                    .into_iter()
                    .map(move |(bit, letter)| if level & bit != 0 { letter } else { '-' })
            })
            .collect()
    }

    pub fn owner_can_write(&self) -> bool {
        self.owner & 0o2 != 0
    }
}

impl TryFrom<String> for PermissionProfile {
    type Error = SettingsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PermissionProfile> for String {
    fn from(value: PermissionProfile) -> Self {
        value.as_octal()
    }
}

impl fmt::Display for PermissionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_octal())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionKind {
    Duplicate,
    EmptyFile,
    TempFile,
    Rename,
    Permissions,
    MoveOriginal,
    VersionConflict,
    /// A kind written by another build of the tool; sorted last and never executed.
    #[serde(other)]
    Unrecognized,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionKind::Duplicate => "DUPLICATE",
            SuggestionKind::EmptyFile => "EMPTY_FILE",
            SuggestionKind::TempFile => "TEMP_FILE",
            SuggestionKind::Rename => "RENAME",
            SuggestionKind::Permissions => "PERMISSIONS",
            SuggestionKind::MoveOriginal => "MOVE_ORIGINAL",
            SuggestionKind::VersionConflict => "VERSION_CONFLICT",
            SuggestionKind::Unrecognized => "UNRECOGNIZED",
        }
    }
}

impl fmt::Display for SuggestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestedAction {
    Delete,
    Rename,
    Chmod,
    Move,
}

impl SuggestedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestedAction::Delete => "DELETE",
            SuggestedAction::Rename => "RENAME",
            SuggestedAction::Chmod => "CHMOD",
            SuggestedAction::Move => "MOVE",
        }
    }
}

impl fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub subject_path: PathBuf,
    pub action: SuggestedAction,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_path: Option<PathBuf>,
}

impl Suggestion {
    pub fn delete(kind: SuggestionKind, subject_path: PathBuf, reason: String) -> Self {
        Self {
            kind,
            subject_path,
            action: SuggestedAction::Delete,
            reason,
            destination_path: None,
        }
    }

    pub fn rename(subject_path: PathBuf, destination_path: PathBuf, reason: String) -> Self {
        Self {
            kind: SuggestionKind::Rename,
            subject_path,
            action: SuggestedAction::Rename,
            reason,
            destination_path: Some(destination_path),
        }
    }

    pub fn chmod(subject_path: PathBuf, reason: String) -> Self {
        Self {
            kind: SuggestionKind::Permissions,
            subject_path,
            action: SuggestedAction::Chmod,
            reason,
            destination_path: None,
        }
    }

    pub fn relocate(subject_path: PathBuf, destination_path: PathBuf, reason: String) -> Self {
        Self {
            kind: SuggestionKind::MoveOriginal,
            subject_path,
            action: SuggestedAction::Move,
            reason,
            destination_path: Some(destination_path),
        }
    }

    pub fn is_delete(&self) -> bool {
        self.action == SuggestedAction::Delete
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Perform,
    Skip,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Perform => f.write_str("PERFORM"),
            Verdict::Skip => f.write_str("SKIP"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScanMetrics {
    #[serde(default)]
    pub scanned_roots: u64,
    #[serde(default)]
    pub scanned_files: u64,
    #[serde(default)]
    pub scanned_directories: u64,
    #[serde(default)]
    pub scanned_bytes: u64,
    #[serde(default)]
    pub unreadable_files: u64,
    #[serde(default)]
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KindCount {
    pub kind: SuggestionKind,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsolidationPlan {
    pub plan_version: String,
    pub generated_at: String,
    pub run_id: String,
    pub target: PathBuf,
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub scan_metrics: ScanMetrics,
    #[serde(default)]
    pub kind_counts: Vec<KindCount>,
    #[serde(default)]
    pub reclaimable_bytes: u64,
    pub suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
