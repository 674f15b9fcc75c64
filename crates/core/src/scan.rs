use std::collections::HashSet;
use std::fs::{File, Metadata};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{Instant, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::model::{Fingerprint, InventoryRecord, PermissionProfile, ScanMetrics};

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub roots: Vec<PathBuf>,
    pub excludes: Vec<String>,
    pub excluded_paths: Vec<PathBuf>,
    pub max_depth: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Inventory {
    pub roots: Vec<PathBuf>,
    pub records: Vec<InventoryRecord>,
    pub metrics: ScanMetrics,
    pub warnings: Vec<String>,
}

pub fn run_scan(options: &ScanOptions) -> Result<Inventory> {
    let started = Instant::now();
    let mut warnings = Vec::new();
    let roots = resolve_roots(&options.roots, &mut warnings)?;
    let exclusions =
        Exclusions::compile(&options.excludes, &options.excluded_paths, &mut warnings);

    let mut records = Vec::new();
    let mut metrics = ScanMetrics {
        scanned_roots: roots.len() as u64,
        ..ScanMetrics::default()
    };

    for root in &roots {
        info!("scanning {}", root.display());
        scan_root(
            root,
            &exclusions,
            options.max_depth,
            &mut records,
            &mut metrics,
            &mut warnings,
        );
    }

    metrics.elapsed_ms = started.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
    info!(
        "scan complete: {} file(s), {} unreadable, {} warning(s)",
        metrics.scanned_files,
        metrics.unreadable_files,
        warnings.len()
    );

    Ok(Inventory {
        roots,
        records,
        metrics,
        warnings,
    })
}

/// Canonicalises roots and drops duplicates and roots nested inside another root,
/// so every file is visited exactly once.
fn resolve_roots(raw_roots: &[PathBuf], warnings: &mut Vec<String>) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    let mut seen = HashSet::new();
    for root in raw_roots {
        let canonical = match root.canonicalize() {
            Ok(path) => path,
            Err(err) => {
                warnings.push(format!("scan root not found: {} ({err})", root.display()));
                continue;
            }
        };
        if !canonical.is_dir() {
            warnings.push(format!("scan root is not a directory: {}", root.display()));
            continue;
        }
        if seen.insert(canonical.clone()) {
            candidates.push(canonical);
        }
    }

    let roots = non_overlapping_roots(candidates, warnings);
    if roots.is_empty() {
        return Err(anyhow!("no valid scan roots were resolved"));
    }
    Ok(roots)
}

fn non_overlapping_roots(candidates: Vec<PathBuf>, warnings: &mut Vec<String>) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for candidate in candidates {
        if let Some(parent) = roots.iter().find(|root| candidate.starts_with(root)) {
            warnings.push(format!(
                "scan root {} is already covered by {}",
                candidate.display(),
                parent.display()
            ));
            continue;
        }
        roots.retain(|root| {
            let covered = root.starts_with(&candidate);
            if covered {
                warnings.push(format!(
                    "scan root {} is already covered by {}",
                    root.display(),
                    candidate.display()
                ));
            }
            !covered
        });
        roots.push(candidate);
    }
    roots
}

fn scan_root(
    root: &Path,
    exclusions: &Exclusions,
    max_depth: Option<usize>,
    records: &mut Vec<InventoryRecord>,
    metrics: &mut ScanMetrics,
    warnings: &mut Vec<String>,
) {
    let mut walker = WalkDir::new(root).follow_links(false);
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    let iter = walker.into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        !exclusions.covers(entry.path())
    });

    for item in iter {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                warnings.push(format!("walk error under {}: {}", root.display(), err));
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        if entry.file_type().is_dir() {
            metrics.scanned_directories += 1;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                warnings.push(format!(
                    "metadata read failed for {}: {}",
                    entry.path().display(),
                    err
                ));
                continue;
            }
        };

        let record = build_record(entry.path().to_path_buf(), &metadata);
        if record.fingerprint.is_unreadable() {
            metrics.unreadable_files += 1;
            warn!("recorded {} as unreadable: {}", record.path.display(), record.fingerprint);
        }
        metrics.scanned_files += 1;
        metrics.scanned_bytes = metrics.scanned_bytes.saturating_add(record.size_bytes);
        records.push(record);
    }
}

pub fn build_record(path: PathBuf, metadata: &Metadata) -> InventoryRecord {
    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(UNIX_EPOCH));
    let created = creation_time(metadata).unwrap_or(modified);
    let fingerprint = fingerprint_file(&path);

    InventoryRecord {
        size_bytes: metadata.len(),
        modified,
        created,
        permissions: PermissionProfile::from_metadata(metadata),
        fingerprint,
        path,
    }
}

fn creation_time(metadata: &Metadata) -> Option<DateTime<Utc>> {
    if let Ok(created) = metadata.created() {
        return Some(DateTime::<Utc>::from(created));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        DateTime::<Utc>::from_timestamp(metadata.ctime(), metadata.ctime_nsec() as u32)
    }

    #[cfg(not(unix))]
    {
        None
    }
}

pub fn fingerprint_file(path: &Path) -> Fingerprint {
    match hash_file(path) {
        Ok(hex) => Fingerprint::Digest { hex },
        Err(err) => Fingerprint::Unreadable {
            reason: format!("{err:#}"),
        },
    }
}

fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0_u8; 64 * 1024];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// What the walk skips: exact paths such as the settings file, globs, and plain-text
/// fragments. Globs and fragments both ignore case.
pub(crate) struct Exclusions {
    exact: HashSet<PathBuf>,
    globs: GlobSet,
    fragments: Vec<String>,
}

const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}'];

enum PatternRule {
    Glob(Glob),
    Fragment(String),
}

impl PatternRule {
    /// Text without glob metacharacters is a fragment. A broken glob degrades to one.
    fn parse(raw: &str, warnings: &mut Vec<String>) -> Option<Self> {
        let pattern = raw.trim();
        if pattern.is_empty() {
            return None;
        }
        if !pattern.contains(GLOB_META) {
            return Some(PatternRule::Fragment(pattern.to_lowercase()));
        }
        match GlobBuilder::new(pattern).case_insensitive(true).build() {
            Ok(glob) => Some(PatternRule::Glob(glob)),
            Err(err) => {
                warnings.push(format!(
                    "exclude pattern '{pattern}' is not a valid glob ({err}); matching it as plain text"
                ));
                Some(PatternRule::Fragment(pattern.to_lowercase()))
            }
        }
    }
}

impl Exclusions {
    pub(crate) fn compile(
        patterns: &[String],
        paths: &[PathBuf],
        warnings: &mut Vec<String>,
    ) -> Self {
        let exact = paths
            .iter()
            .map(|path| path.canonicalize().unwrap_or_else(|_| path.clone()))
            .collect();

        let mut builder = GlobSetBuilder::new();
        let mut fragments = Vec::new();
        for rule in patterns
            .iter()
            .filter_map(|raw| PatternRule::parse(raw, warnings))
        {
            match rule {
                PatternRule::Glob(glob) => {
                    builder.add(glob);
                }
                PatternRule::Fragment(fragment) => fragments.push(fragment),
            }
        }
        let globs = builder.build().unwrap_or_else(|err| {
            warnings.push(format!(
                "exclude globs could not be compiled ({err}); only plain-text patterns apply"
            ));
            GlobSet::empty()
        });

        Self {
            exact,
            globs,
            fragments,
        }
    }

    pub(crate) fn covers(&self, path: &Path) -> bool {
        if self.exact.contains(path) || self.globs.is_match(path) {
            return true;
        }
        if self.fragments.is_empty() {
            return false;
        }
        let lowered = path.to_string_lossy().to_lowercase();
        self.fragments
            .iter()
            .any(|fragment| lowered.contains(fragment.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use tempfile::TempDir;

    use super::{fingerprint_file, run_scan, Exclusions, ScanOptions};

    #[test]
    fn exclusions_match_globs_fragments_and_exact_paths() {
        let mut warnings = Vec::new();
        let exclusions = Exclusions::compile(
            &[
                "**/*.ISO".to_string(),
                "[".to_string(),
                "Node_Modules".to_string(),
                "   ".to_string(),
            ],
            &[PathBuf::from("/home/user/.clean_files")],
            &mut warnings,
        );

        assert!(exclusions.covers(Path::new("/data/disk.iso")));
        assert!(exclusions.covers(Path::new("/repo/node_modules/pkg/index.js")));
        assert!(exclusions.covers(Path::new("/tmp/a[b.txt")));
        assert!(exclusions.covers(Path::new("/home/user/.clean_files")));
        assert!(!exclusions.covers(Path::new("/home/user/.clean_files.bak")));
        assert!(!exclusions.covers(Path::new("/repo/src/main.rs")));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'['"));
    }

    #[test]
    fn identical_content_shares_fingerprint() {
        let temp = TempDir::new().expect("tempdir");
        let a = temp.path().join("a.bin");
        let b = temp.path().join("b.bin");
        let c = temp.path().join("c.bin");
        fs::write(&a, b"duplicate-content").expect("write a");
        fs::write(&b, b"duplicate-content").expect("write b");
        fs::write(&c, b"unique-content").expect("write c");

        assert_eq!(fingerprint_file(&a), fingerprint_file(&b));
        assert_ne!(fingerprint_file(&a), fingerprint_file(&c));
        assert!(fingerprint_file(&temp.path().join("missing.bin")).is_unreadable());
    }

    #[test]
    fn nested_and_repeated_roots_are_scanned_once() {
        let temp = TempDir::new().expect("tempdir");
        let nested = temp.path().join("nested");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(temp.path().join("top.txt"), b"top").expect("write top");
        fs::write(nested.join("inner.txt"), b"inner").expect("write inner");

        let options = ScanOptions {
            roots: vec![
                temp.path().to_path_buf(),
                nested.clone(),
                temp.path().to_path_buf(),
            ],
            ..ScanOptions::default()
        };
        let inventory = run_scan(&options).expect("scan succeeds");

        assert_eq!(inventory.roots.len(), 1);
        assert_eq!(inventory.records.len(), 2);
        assert_eq!(inventory.metrics.scanned_files, 2);
        assert_eq!(inventory.metrics.scanned_bytes, 8);
    }

    #[test]
    fn excluded_paths_are_not_recorded() {
        let temp = TempDir::new().expect("tempdir");
        let settings = temp.path().join(".clean_files");
        fs::write(&settings, b"{}").expect("write settings");
        fs::write(temp.path().join("keep.txt"), b"keep").expect("write keep");

        let options = ScanOptions {
            roots: vec![temp.path().to_path_buf()],
            excluded_paths: vec![settings],
            ..ScanOptions::default()
        };
        let inventory = run_scan(&options).expect("scan succeeds");
        let names = inventory
            .records
            .iter()
            .filter_map(|record| record.file_name().map(PathBuf::from))
            .collect::<Vec<_>>();
        assert_eq!(names, vec![PathBuf::from("keep.txt")]);
    }

    #[test]
    fn missing_roots_are_fatal_when_nothing_resolves() {
        let options = ScanOptions {
            roots: vec![PathBuf::from("/definitely/not/a/real/root")],
            ..ScanOptions::default()
        };
        assert!(run_scan(&options).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn records_normalised_permission_profile() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().expect("tempdir");
        let script = temp.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").expect("write script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");

        let options = ScanOptions {
            roots: vec![temp.path().to_path_buf()],
            ..ScanOptions::default()
        };
        let inventory = run_scan(&options).expect("scan succeeds");
        assert_eq!(inventory.records[0].permissions.as_octal(), "755");
    }
}
