use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::execute::{ExecutionOutcome, Executor};
use crate::model::{SuggestedAction, Suggestion, Verdict};
use crate::resolve::{Resolver, VerdictSource};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntry {
    /// The suggestion as executed, after earlier renames and moves were applied to its paths.
    pub suggestion: Suggestion,
    pub verdict: Verdict,
    pub source: VerdictSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
}

impl SessionEntry {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, Some(ExecutionOutcome::Failed { .. }))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionReport {
    pub entries: Vec<SessionEntry>,
    pub performed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Where files that were renamed or moved earlier in the session live now.
#[derive(Debug, Clone, Default)]
pub struct PathForwarding {
    moved: HashMap<PathBuf, PathBuf>,
}

impl PathForwarding {
    pub fn record(&mut self, from: &Path, to: &Path) {
        if from == to {
            return;
        }
        self.moved.remove(to);
        for current in self.moved.values_mut() {
            if current == from {
                *current = to.to_path_buf();
            }
        }
        self.moved.insert(from.to_path_buf(), to.to_path_buf());
    }

    pub fn current(&self, path: &Path) -> Option<&Path> {
        self.moved.get(path).map(PathBuf::as_path)
    }

    pub fn forward(&self, suggestion: &Suggestion) -> Suggestion {
        let mut forwarded = suggestion.clone();
        let Some(current) = self.current(&suggestion.subject_path) else {
            return forwarded;
        };

        forwarded.destination_path = match (suggestion.action, &suggestion.destination_path) {
            (SuggestedAction::Rename, Some(destination)) => {
                match (current.parent(), destination.file_name()) {
                    (Some(parent), Some(name)) => Some(parent.join(name)),
                    _ => Some(destination.clone()),
                }
            }
            (SuggestedAction::Move, Some(destination)) => {
                match (destination.parent(), current.file_name()) {
                    (Some(parent), Some(name)) => Some(parent.join(name)),
                    _ => Some(destination.clone()),
                }
            }
            (_, destination) => destination.clone(),
        };
        forwarded.subject_path = current.to_path_buf();
        forwarded
    }
}

/// Walks prioritized suggestions in order: resolve, execute when approved, report.
/// Every suggestion produces exactly one entry; `on_entry` sees each as it completes.
pub fn run_session<R, W, F>(
    suggestions: &[Suggestion],
    resolver: &mut Resolver<R, W>,
    executor: &Executor,
    mut on_entry: F,
) -> SessionReport
where
    R: BufRead,
    W: Write,
    F: FnMut(usize, &SessionEntry),
{
    let mut forwarding = PathForwarding::default();
    let mut report = SessionReport::default();

    for (index, original) in suggestions.iter().enumerate() {
        let suggestion = forwarding.forward(original);
        let resolution = resolver.resolve(&suggestion);

        let outcome = match resolution.verdict {
            Verdict::Skip => {
                report.skipped += 1;
                None
            }
            Verdict::Perform => {
                let outcome = executor.apply(&suggestion);
                if outcome.is_applied() {
                    report.performed += 1;
                    if let Some(destination) = &suggestion.destination_path {
                        forwarding.record(&suggestion.subject_path, destination);
                    }
                } else {
                    report.failed += 1;
                }
                Some(outcome)
            }
        };

        let entry = SessionEntry {
            suggestion,
            verdict: resolution.verdict,
            source: resolution.source,
            outcome,
        };
        on_entry(index, &entry);
        report.entries.push(entry);
    }

    info!(
        "session finished: {} performed, {} skipped, {} failed",
        report.performed, report.skipped, report.failed
    );
    report
}
