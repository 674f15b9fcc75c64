use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use tracing::debug;

use crate::model::{InventoryRecord, Suggestion, SuggestionKind};
use crate::settings::Settings;

pub struct ClassifyContext<'a> {
    pub target_dir: &'a Path,
    pub settings: &'a Settings,
}

/// What an earlier pass decided about a path. Later passes defer to these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Delete,
    KeepOriginal,
}

#[derive(Default)]
struct Claims<'a> {
    by_path: HashMap<&'a Path, Claim>,
}

impl<'a> Claims<'a> {
    fn is_deleted(&self, path: &Path) -> bool {
        self.by_path.get(path) == Some(&Claim::Delete)
    }

    fn is_kept_original(&self, path: &Path) -> bool {
        self.by_path.get(path) == Some(&Claim::KeepOriginal)
    }

    /// Returns false when the path already carries a claim.
    fn claim_delete(&mut self, path: &'a Path) -> bool {
        if self.by_path.contains_key(path) {
            return false;
        }
        self.by_path.insert(path, Claim::Delete);
        true
    }

    fn keep_original(&mut self, path: &'a Path) {
        self.by_path.entry(path).or_insert(Claim::KeepOriginal);
    }

    /// Like `claim_delete`, but a kept original gives way. `None` means the path was already
    /// claimed for deletion; otherwise the replaced claim, if any, is returned.
    fn claim_delete_over_original(&mut self, path: &'a Path) -> Option<Option<Claim>> {
        match self.by_path.get(path).copied() {
            Some(Claim::Delete) => None,
            previous => {
                self.by_path.insert(path, Claim::Delete);
                Some(previous)
            }
        }
    }
}

/// Records grouped by key, with groups kept in first-seen inventory order.
struct GroupIndex<'a, K> {
    order: Vec<K>,
    members: HashMap<K, Vec<&'a InventoryRecord>>,
}

impl<'a, K> GroupIndex<'a, K>
where
    K: Eq + Hash + Copy,
{
    fn build<F>(records: &'a [InventoryRecord], key: F) -> Self
    where
        F: Fn(&'a InventoryRecord) -> Option<K>,
    {
        let mut order = Vec::new();
        let mut members: HashMap<K, Vec<&'a InventoryRecord>> = HashMap::new();
        for record in records {
            let Some(group_key) = key(record) else {
                continue;
            };
            let group = members.entry(group_key).or_default();
            if group.is_empty() {
                order.push(group_key);
            }
            group.push(record);
        }
        Self { order, members }
    }

    fn groups(&self) -> impl Iterator<Item = (K, &[&'a InventoryRecord])> + '_ {
        self.order.iter().filter_map(|key| {
            self.members
                .get(key)
                .map(|members| (*key, members.as_slice()))
        })
    }
}

pub fn classify(records: &[InventoryRecord], context: &ClassifyContext<'_>) -> Vec<Suggestion> {
    let by_fingerprint = GroupIndex::build(records, |record| record.fingerprint.digest());
    let by_name = GroupIndex::build(records, InventoryRecord::file_name);

    let mut claims = Claims::default();
    let mut suggestions = Vec::new();

    duplicate_pass(&by_fingerprint, context.target_dir, &mut claims, &mut suggestions);
    predicate_pass(records, context.settings, &mut claims, &mut suggestions);
    version_conflict_pass(&by_name, &mut claims, &mut suggestions);

    debug!(
        "classified {} record(s) into {} suggestion(s)",
        records.len(),
        suggestions.len()
    );
    suggestions
}

fn duplicate_pass<'a>(
    index: &GroupIndex<'a, &'a str>,
    target_dir: &Path,
    claims: &mut Claims<'a>,
    out: &mut Vec<Suggestion>,
) {
    for (digest, members) in index.groups() {
        if members.len() < 2 || members.iter().all(|record| record.is_empty()) {
            continue;
        }
        let Some(original) = select_original(members) else {
            continue;
        };
        claims.keep_original(&original.path);

        for record in members.iter().copied() {
            if record.path == original.path || !claims.claim_delete(&record.path) {
                continue;
            }
            out.push(Suggestion::delete(
                SuggestionKind::Duplicate,
                record.path.clone(),
                format!(
                    "Identical content (blake3 {}) to original {} created {}.",
                    digest,
                    original.path.display(),
                    original.created.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
            ));
        }

        if original.is_within(target_dir) {
            continue;
        }
        if let Some(name) = original.file_name() {
            out.push(Suggestion::relocate(
                original.path.clone(),
                target_dir.join(name),
                format!(
                    "Original of {} identical file(s) (blake3 {}) lives outside target {}.",
                    members.len(),
                    digest,
                    target_dir.display()
                ),
            ));
        }
    }
}

/// Oldest creation time wins; equal creation times fall back to the lexically smallest path.
pub fn select_original<'a>(members: &[&'a InventoryRecord]) -> Option<&'a InventoryRecord> {
    members.iter().copied().min_by(|a, b| {
        a.created
            .cmp(&b.created)
            .then_with(|| a.path.cmp(&b.path))
    })
}

fn predicate_pass<'a>(
    records: &'a [InventoryRecord],
    settings: &Settings,
    claims: &mut Claims<'a>,
    out: &mut Vec<Suggestion>,
) {
    let mut displaced_originals = HashSet::new();

    for record in records {
        if claims.is_deleted(&record.path) {
            continue;
        }

        let verdict = if record.is_empty() {
            Some((
                SuggestionKind::EmptyFile,
                "File is empty (size = 0 bytes).".to_string(),
            ))
        } else {
            matching_temp_suffix(&record.path, &settings.temp_suffixes).map(|suffix| {
                (
                    SuggestionKind::TempFile,
                    format!("Temporary file (name matches '{suffix}')."),
                )
            })
        };
        if let Some((kind, reason)) = verdict {
            if let Some(previous) = claims.claim_delete_over_original(&record.path) {
                if previous == Some(Claim::KeepOriginal) {
                    debug!(
                        "{} was kept as a duplicate original but is {kind}; deleting it",
                        record.path.display()
                    );
                    displaced_originals.insert(record.path.as_path());
                }
                out.push(Suggestion::delete(kind, record.path.clone(), reason));
            }
            continue;
        }

        if let Some(new_name) = record
            .file_name()
            .and_then(OsStr::to_str)
            .and_then(|name| sanitized_file_name(name, settings))
        {
            let destination = record
                .path
                .parent()
                .map(|parent| parent.join(&new_name))
                .unwrap_or_else(|| PathBuf::from(&new_name));
            out.push(Suggestion::rename(
                record.path.clone(),
                destination,
                format!(
                    "Name contains troublesome characters; suggested name: {new_name}."
                ),
            ));
        }

        if record.permissions != settings.permissions {
            out.push(Suggestion::chmod(
                record.path.clone(),
                format!(
                    "Permissions are {} ({}); expected {} ({}).",
                    record.permissions.as_octal(),
                    record.permissions.as_symbolic(),
                    settings.permissions.as_octal(),
                    settings.permissions.as_symbolic()
                ),
            ));
        }
    }

    if !displaced_originals.is_empty() {
        out.retain(|suggestion| {
            suggestion.kind != SuggestionKind::MoveOriginal
                || !displaced_originals.contains(suggestion.subject_path.as_path())
        });
    }
}

/// Matches by literal name suffix or by extension equality (`.tmp` against `x.tmp`).
pub fn matching_temp_suffix<'s>(path: &Path, suffixes: &'s [String]) -> Option<&'s str> {
    let name = path.file_name()?.to_string_lossy();
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()));
    suffixes
        .iter()
        .find(|suffix| {
            !suffix.is_empty()
                && (name.ends_with(suffix.as_str()) || extension.as_deref() == Some(suffix.as_str()))
        })
        .map(String::as_str)
}

/// Replaces troublesome characters in the base name only. The extension, and the dot that
/// separates it, are reattached untouched. Returns `None` when nothing would change.
pub fn sanitized_file_name(name: &str, settings: &Settings) -> Option<String> {
    let path = Path::new(name);
    let stem = path.file_stem()?.to_str()?;
    let extension = path.extension().and_then(OsStr::to_str);

    let new_stem = stem
        .chars()
        .map(|ch| {
            if settings.troublesome_chars.contains(&ch) {
                settings.substitute
            } else {
                ch
            }
        })
        .collect::<String>();
    if new_stem == stem {
        return None;
    }

    let new_name = match extension {
        Some(ext) => format!("{new_stem}.{ext}"),
        None => new_stem,
    };
    (new_name != name).then_some(new_name)
}

fn version_conflict_pass<'a>(
    index: &GroupIndex<'a, &'a OsStr>,
    claims: &mut Claims<'a>,
    out: &mut Vec<Suggestion>,
) {
    let mut superseded = HashSet::new();

    for (name, members) in index.groups() {
        if members.len() < 2 {
            continue;
        }
        let live = members
            .iter()
            .copied()
            .filter(|record| !claims.is_deleted(&record.path))
            .collect::<Vec<_>>();
        if live.len() < 2 || all_identical(&live) {
            continue;
        }
        let Some(keeper) = select_newest(&live) else {
            continue;
        };

        for record in live.iter().copied() {
            if record.path == keeper.path {
                continue;
            }
            if claims.is_kept_original(&record.path) {
                debug!(
                    "{} is the original of a duplicate group; not superseding it",
                    record.path.display()
                );
                continue;
            }
            if !claims.claim_delete(&record.path) {
                continue;
            }
            superseded.insert(record.path.clone());
            out.push(Suggestion::delete(
                SuggestionKind::VersionConflict,
                record.path.clone(),
                format!(
                    "Another file named {} with different content, {}, was modified more recently ({}); this copy was modified {}.",
                    name.to_string_lossy(),
                    keeper.path.display(),
                    keeper.modified.to_rfc3339_opts(SecondsFormat::Secs, true),
                    record.modified.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
            ));
        }
    }

    if !superseded.is_empty() {
        out.retain(|suggestion| {
            suggestion.is_delete() || !superseded.contains(&suggestion.subject_path)
        });
    }
}

fn all_identical(records: &[&InventoryRecord]) -> bool {
    let Some(first) = records.first() else {
        return true;
    };
    first.fingerprint.digest().is_some()
        && records
            .iter()
            .all(|record| record.fingerprint == first.fingerprint)
}

/// Latest modification time wins; equal times fall back to the lexically smallest path.
pub fn select_newest<'a>(members: &[&'a InventoryRecord]) -> Option<&'a InventoryRecord> {
    members.iter().copied().max_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then_with(|| b.path.cmp(&a.path))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};

    use chrono::{Duration, TimeZone, Utc};

    use super::{classify, sanitized_file_name, select_newest, select_original, ClassifyContext};
    use crate::model::{
        Fingerprint, InventoryRecord, PermissionProfile, SuggestedAction, Suggestion,
        SuggestionKind,
    };
    use crate::settings::Settings;

    const TARGET: &str = "/data/target";

    fn record(path: &str, content: &str, created_day: i64, modified_day: i64) -> InventoryRecord {
        let epoch = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .expect("valid date");
        InventoryRecord {
            path: PathBuf::from(path),
            size_bytes: content.len() as u64,
            modified: epoch + Duration::days(modified_day),
            created: epoch + Duration::days(created_day),
            permissions: PermissionProfile::from_mode(0o644),
            fingerprint: Fingerprint::Digest {
                hex: blake3::hash(content.as_bytes()).to_hex().to_string(),
            },
        }
    }

    fn run(records: &[InventoryRecord]) -> Vec<Suggestion> {
        let settings = Settings::default();
        let context = ClassifyContext {
            target_dir: Path::new(TARGET),
            settings: &settings,
        };
        classify(records, &context)
    }

    #[test]
    fn identical_files_keep_the_oldest_original() {
        let records = vec![
            record("/data/target/a.txt", "same bytes", 1, 1),
            record("/data/target/b.txt", "same bytes", 2, 2),
        ];
        let suggestions = run(&records);

        assert_eq!(suggestions.len(), 1);
        let only = &suggestions[0];
        assert_eq!(only.kind, SuggestionKind::Duplicate);
        assert_eq!(only.action, SuggestedAction::Delete);
        assert_eq!(only.subject_path, PathBuf::from("/data/target/b.txt"));
        assert!(only.reason.contains("/data/target/a.txt"));
        assert!(only.reason.contains(&blake3::hash(b"same bytes").to_hex().to_string()));
    }

    #[test]
    fn troublesome_name_yields_rename_with_substitute() {
        let records = vec![record("/data/target/report:v1.txt", "report", 1, 1)];
        let suggestions = run(&records);

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, SuggestionKind::Rename);
        assert_eq!(
            suggestions[0].destination_path,
            Some(PathBuf::from("/data/target/report_v1.txt"))
        );
    }

    #[test]
    fn same_name_different_content_deletes_the_older_version() {
        let records = vec![
            record("/data/source/draft.docx", "first draft", 1, 1),
            record("/data/target/draft.docx", "second draft", 1, 5),
        ];
        let suggestions = run(&records);

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, SuggestionKind::VersionConflict);
        assert_eq!(
            suggestions[0].subject_path,
            PathBuf::from("/data/source/draft.docx")
        );
        assert!(suggestions[0].reason.contains("/data/target/draft.docx"));
        assert!(suggestions[0].reason.contains("2024-01-06"));
    }

    #[test]
    fn empty_file_short_circuits_other_checks() {
        let mut empty = record("/data/target/place:holder.log", "", 1, 1);
        empty.permissions = PermissionProfile::from_mode(0o777);
        let suggestions = run(&[empty]);

        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].kind, SuggestionKind::EmptyFile);
        assert_eq!(suggestions[0].action, SuggestedAction::Delete);
    }

    #[test]
    fn zero_byte_files_are_never_duplicates() {
        let records = vec![
            record("/data/target/a.log", "", 1, 1),
            record("/data/target/b.log", "", 2, 2),
        ];
        let suggestions = run(&records);

        assert_eq!(suggestions.len(), 2);
        assert!(suggestions
            .iter()
            .all(|suggestion| suggestion.kind == SuggestionKind::EmptyFile));
    }

    #[test]
    fn original_outside_target_is_moved_in() {
        let records = vec![
            record("/data/target/copy.txt", "payload", 3, 3),
            record("/data/source/photo.txt", "payload", 1, 1),
        ];
        let suggestions = run(&records);

        let moves = suggestions
            .iter()
            .filter(|suggestion| suggestion.kind == SuggestionKind::MoveOriginal)
            .collect::<Vec<_>>();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].subject_path, PathBuf::from("/data/source/photo.txt"));
        assert_eq!(
            moves[0].destination_path,
            Some(PathBuf::from("/data/target/photo.txt"))
        );
        assert!(suggestions.iter().any(|suggestion| {
            suggestion.kind == SuggestionKind::Duplicate
                && suggestion.subject_path == Path::new("/data/target/copy.txt")
        }));
    }

    #[test]
    fn equal_creation_times_break_ties_by_path() {
        let b = record("/data/target/b.txt", "tie", 1, 1);
        let a = record("/data/target/a.txt", "tie", 1, 1);
        assert_eq!(
            select_original(&[&b, &a]).map(|r| r.path.clone()),
            Some(a.path.clone())
        );

        let suggestions = run(&[b, a]);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].subject_path, PathBuf::from("/data/target/b.txt"));
    }

    #[test]
    fn equal_modification_times_break_ties_by_path() {
        let y = record("/data/y/notes.md", "one", 1, 4);
        let x = record("/data/x/notes.md", "two", 1, 4);
        assert_eq!(
            select_newest(&[&y, &x]).map(|r| r.path.clone()),
            Some(x.path.clone())
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let records = vec![
            record("/data/target/a.txt", "dup", 5, 5),
            record("/data/source/a.txt", "dup", 2, 2),
            record("/data/source/c.txt", "dup", 9, 9),
            record("/data/source/odd name?.txt", "x", 1, 1),
            record("/data/source/draft.md", "v1", 1, 1),
            record("/data/target/draft.md", "v2", 1, 3),
        ];
        assert_eq!(run(&records), run(&records));
    }

    #[test]
    fn no_path_is_deleted_twice() {
        let records = vec![
            record("/data/target/report.txt", "alpha", 1, 9),
            record("/data/source/report.txt", "alpha", 2, 1),
            record("/data/other/report.txt", "beta", 3, 2),
            record("/data/other/cache.tmp", "alpha", 4, 4),
            record("/data/other/blank.tmp", "", 4, 4),
        ];
        let suggestions = run(&records);
        let mut seen = HashSet::new();
        for suggestion in suggestions.iter().filter(|s| s.is_delete()) {
            assert!(
                seen.insert(suggestion.subject_path.clone()),
                "{} deleted twice",
                suggestion.subject_path.display()
            );
        }
    }

    #[test]
    fn duplicate_original_is_not_superseded_by_version_conflict() {
        let records = vec![
            record("/data/source/report.txt", "alpha", 1, 1),
            record("/data/backup/report.txt", "alpha", 2, 2),
            record("/data/target/report.txt", "beta", 3, 9),
        ];
        let suggestions = run(&records);

        assert!(suggestions.iter().any(|s| {
            s.kind == SuggestionKind::Duplicate && s.subject_path == Path::new("/data/backup/report.txt")
        }));
        assert!(!suggestions.iter().any(|s| {
            s.kind == SuggestionKind::VersionConflict
                && s.subject_path == Path::new("/data/source/report.txt")
        }));
    }

    #[test]
    fn superseded_versions_drop_their_rename_and_chmod() {
        let mut older = record("/data/source/plan:a.txt", "old", 1, 1);
        older.permissions = PermissionProfile::from_mode(0o600);
        let newer = record("/data/target/plan:a.txt", "new", 1, 8);
        let suggestions = run(&[older, newer]);

        let on_older = suggestions
            .iter()
            .filter(|s| s.subject_path == Path::new("/data/source/plan:a.txt"))
            .collect::<Vec<_>>();
        assert_eq!(on_older.len(), 1);
        assert_eq!(on_older[0].kind, SuggestionKind::VersionConflict);
        assert!(suggestions.iter().any(|s| {
            s.kind == SuggestionKind::Rename && s.subject_path == Path::new("/data/target/plan:a.txt")
        }));
    }

    #[test]
    fn unreadable_records_skip_duplicates_but_get_other_checks() {
        let mut first = record("/data/target/locked.bin", "x", 1, 1);
        first.fingerprint = Fingerprint::Unreadable {
            reason: "denied".to_string(),
        };
        first.permissions = PermissionProfile::from_mode(0o000);
        let mut second = record("/data/target/other.bin", "y", 1, 1);
        second.fingerprint = first.fingerprint.clone();
        let suggestions = run(&[first, second]);

        assert!(!suggestions.iter().any(|s| s.kind == SuggestionKind::Duplicate));
        assert!(suggestions.iter().any(|s| s.kind == SuggestionKind::Permissions));
    }

    #[test]
    fn temp_files_match_suffix_or_extension() {
        let records = vec![
            record("/data/target/notes.txt~", "a", 1, 1),
            record("/data/target/.DS_Store", "b", 1, 1),
            record("/data/target/build.tmp", "c", 1, 1),
            record("/data/target/keep.txt", "d", 1, 1),
        ];
        let suggestions = run(&records);

        assert_eq!(
            suggestions
                .iter()
                .filter(|s| s.kind == SuggestionKind::TempFile)
                .count(),
            3
        );
        assert!(suggestions.iter().all(|s| s.subject_path != Path::new("/data/target/keep.txt")));
    }

    #[test]
    fn temp_file_original_is_still_deleted_as_temp() {
        let records = vec![
            record("/data/target/build.tmp", "cache", 1, 1),
            record("/data/target/build2.tmp", "cache", 2, 2),
        ];
        let suggestions = run(&records);

        assert_eq!(suggestions.len(), 2);
        assert!(suggestions.iter().any(|s| {
            s.kind == SuggestionKind::TempFile && s.subject_path == Path::new("/data/target/build.tmp")
        }));
        assert!(suggestions.iter().any(|s| {
            s.kind == SuggestionKind::Duplicate
                && s.subject_path == Path::new("/data/target/build2.tmp")
        }));
    }

    #[test]
    fn temp_file_original_outside_target_is_not_moved() {
        let records = vec![
            record("/data/source/cache.tmp", "cache", 1, 1),
            record("/data/target/cache.txt", "cache", 2, 2),
        ];
        let suggestions = run(&records);

        assert!(!suggestions.iter().any(|s| s.kind == SuggestionKind::MoveOriginal));
        let on_original = suggestions
            .iter()
            .filter(|s| s.subject_path == Path::new("/data/source/cache.tmp"))
            .collect::<Vec<_>>();
        assert_eq!(on_original.len(), 1);
        assert_eq!(on_original[0].kind, SuggestionKind::TempFile);
        assert_eq!(on_original[0].action, SuggestedAction::Delete);
    }

    #[test]
    fn troublesome_name_and_wrong_mode_yield_rename_then_chmod() {
        let mut locked = record("/data/target/report:v1.txt", "report", 1, 1);
        locked.permissions = PermissionProfile::from_mode(0o600);
        let suggestions = run(&[locked]);

        let kinds = suggestions.iter().map(|s| s.kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec![SuggestionKind::Rename, SuggestionKind::Permissions]);
        assert_eq!(
            suggestions[0].destination_path,
            Some(PathBuf::from("/data/target/report_v1.txt"))
        );
        assert_eq!(suggestions[1].action, SuggestedAction::Chmod);
        assert!(suggestions
            .iter()
            .all(|s| s.subject_path == Path::new("/data/target/report:v1.txt")));
    }

    #[test]
    fn rename_preserves_extension_and_strips_inner_dots() {
        let settings = Settings::default();
        assert_eq!(
            sanitized_file_name("my.report.pdf", &settings),
            Some("my_report.pdf".to_string())
        );
        assert_eq!(
            sanitized_file_name("a#b|c.tar", &settings),
            Some("a_b_c.tar".to_string())
        );
        assert_eq!(sanitized_file_name("clean-name.pdf", &settings), None);

        let renamed = sanitized_file_name("x;y*z.final.txt", &settings).expect("rename");
        let renamed_path = Path::new(&renamed);
        assert_eq!(
            renamed_path.extension().and_then(|e| e.to_str()),
            Some("txt")
        );
        let stem = renamed_path
            .file_stem()
            .and_then(|s| s.to_str())
            .expect("stem");
        assert!(!stem.chars().any(|ch| settings.troublesome_chars.contains(&ch)));
    }
}
