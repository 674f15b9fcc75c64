use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::execute::{ExecutionFailure, Executor};

#[derive(Debug, Clone, Default)]
pub struct FlattenOptions {
    pub target: PathBuf,
    pub sources: Vec<PathBuf>,
    /// Files that are never moved, such as the settings file.
    pub excluded_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlattenMove {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlattenConflict {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlattenPlan {
    pub target: PathBuf,
    /// Directories whose empty subdirectories are pruned after the moves. Never removed themselves.
    pub prune_roots: Vec<PathBuf>,
    pub moves: Vec<FlattenMove>,
    pub conflicts: Vec<FlattenConflict>,
    pub warnings: Vec<String>,
}

impl FlattenPlan {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlattenFailure {
    pub source: PathBuf,
    pub failure: ExecutionFailure,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlattenReport {
    pub moved: Vec<FlattenMove>,
    pub conflicts: Vec<FlattenConflict>,
    pub failures: Vec<FlattenFailure>,
    pub pruned_directories: Vec<PathBuf>,
}

/// Gathers every file below the sources and below the target's subdirectories and maps
/// each onto the target's top level. Files already at the target's top level stay put.
pub fn collect_flatten_plan(options: &FlattenOptions) -> Result<FlattenPlan> {
    let target = options
        .target
        .canonicalize()
        .with_context(|| format!("failed to resolve target {}", options.target.display()))?;
    let excluded = options
        .excluded_paths
        .iter()
        .map(|path| path.canonicalize().unwrap_or_else(|_| path.clone()))
        .collect::<HashSet<_>>();

    let mut plan = FlattenPlan {
        target: target.clone(),
        ..FlattenPlan::default()
    };
    let mut prune_roots = vec![target.clone()];
    for source in &options.sources {
        match source.canonicalize() {
            Ok(path) if path.is_dir() => {
                if !prune_roots.contains(&path) {
                    prune_roots.push(path);
                }
            }
            Ok(path) => plan
                .warnings
                .push(format!("flatten source is not a directory: {}", path.display())),
            Err(err) => plan.warnings.push(format!(
                "flatten source not found: {} ({err})",
                source.display()
            )),
        }
    }

    let mut seen = HashSet::new();
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    for root in &prune_roots {
        for item in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    plan.warnings
                        .push(format!("walk error under {}: {}", root.display(), err));
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.parent() == Some(target.as_path())
                || excluded.contains(path)
                || !seen.insert(path.to_path_buf())
            {
                continue;
            }
            let Some(name) = path.file_name() else {
                continue;
            };

            let destination = target.join(name);
            if fs::symlink_metadata(&destination).is_ok() {
                plan.conflicts.push(FlattenConflict {
                    source: path.to_path_buf(),
                    destination,
                    detail: "a file with this name already exists in the target".to_string(),
                });
                continue;
            }
            if let Some(earlier) = claimed.get(&destination) {
                plan.conflicts.push(FlattenConflict {
                    source: path.to_path_buf(),
                    detail: format!("{} is moved to the same name first", earlier.display()),
                    destination,
                });
                continue;
            }

            claimed.insert(destination.clone(), path.to_path_buf());
            plan.moves.push(FlattenMove {
                source: path.to_path_buf(),
                destination,
            });
        }
    }

    plan.prune_roots = prune_roots;
    info!(
        "flatten plan: {} move(s), {} conflict(s)",
        plan.moves.len(),
        plan.conflicts.len()
    );
    Ok(plan)
}

pub fn apply_flatten_plan(plan: &FlattenPlan, executor: &Executor) -> FlattenReport {
    let mut report = FlattenReport {
        conflicts: plan.conflicts.clone(),
        ..FlattenReport::default()
    };

    for planned in &plan.moves {
        match executor.relocate(&planned.source, &planned.destination) {
            Ok(()) => report.moved.push(planned.clone()),
            Err(ExecutionFailure::DestinationExists { destination }) => {
                report.conflicts.push(FlattenConflict {
                    source: planned.source.clone(),
                    destination,
                    detail: "the destination appeared before the move".to_string(),
                })
            }
            Err(failure) => report.failures.push(FlattenFailure {
                source: planned.source.clone(),
                failure,
            }),
        }
    }

    report.pruned_directories = prune_empty_directories(&plan.prune_roots);
    info!(
        "flatten finished: {} moved, {} conflict(s), {} failure(s), {} directories pruned",
        report.moved.len(),
        report.conflicts.len(),
        report.failures.len(),
        report.pruned_directories.len()
    );
    report
}

/// Removes empty directories below `roots`, deepest first. The roots themselves are kept
/// and removal failures are ignored.
pub fn prune_empty_directories(roots: &[PathBuf]) -> Vec<PathBuf> {
    let protected = roots.iter().collect::<HashSet<_>>();
    let mut directories = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            match entry {
                Ok(entry) if entry.file_type().is_dir() => {
                    directories.push(entry.into_path());
                }
                Ok(_) => {}
                Err(err) => warn!("walk error while pruning {}: {err}", root.display()),
            }
        }
    }
    directories.sort_by(|left, right| {
        depth(right)
            .cmp(&depth(left))
            .then_with(|| left.cmp(right))
    });
    directories.dedup();

    let mut pruned = Vec::new();
    for directory in directories {
        if protected.contains(&directory) {
            continue;
        }
        match fs::remove_dir(&directory) {
            Ok(()) => pruned.push(directory),
            Err(err) => debug!("kept {}: {err}", directory.display()),
        }
    }
    pruned
}

fn depth(path: &Path) -> usize {
    path.components().count()
}
