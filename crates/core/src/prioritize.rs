use crate::model::{Suggestion, SuggestionKind};

/// Presentation and execution order: obvious cleanups first, reorganisation last.
pub const PRIORITY_ORDER: [SuggestionKind; 7] = [
    SuggestionKind::EmptyFile,
    SuggestionKind::TempFile,
    SuggestionKind::Duplicate,
    SuggestionKind::VersionConflict,
    SuggestionKind::Rename,
    SuggestionKind::Permissions,
    SuggestionKind::MoveOriginal,
];

pub fn priority_rank(kind: SuggestionKind) -> usize {
    PRIORITY_ORDER
        .iter()
        .position(|candidate| *candidate == kind)
        .unwrap_or(PRIORITY_ORDER.len())
}

/// Stable: suggestions of the same kind keep the order the classifier emitted them in.
pub fn prioritize(suggestions: &mut [Suggestion]) {
    suggestions.sort_by_key(|suggestion| priority_rank(suggestion.kind));
}
