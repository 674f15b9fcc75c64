pub mod classify;
pub mod execute;
pub mod flatten;
pub mod markdown;
pub mod model;
pub mod plan;
pub mod prioritize;
pub mod resolve;
pub mod scan;
pub mod session;
pub mod settings;

pub use classify::{classify, ClassifyContext};
pub use execute::{move_file, ExecutionFailure, ExecutionOutcome, Executor};
pub use flatten::{
    apply_flatten_plan, collect_flatten_plan, prune_empty_directories, FlattenConflict,
    FlattenFailure, FlattenMove, FlattenOptions, FlattenPlan, FlattenReport,
};
pub use markdown::{human_bytes, render_plan_markdown};
pub use model::{
    ConsolidationPlan, Fingerprint, InventoryRecord, KindCount, PermissionProfile, ScanMetrics,
    SuggestedAction, Suggestion, SuggestionKind, Verdict, PLAN_VERSION,
};
pub use plan::{build_plan, default_plan_path, load_plan, save_plan};
pub use prioritize::{prioritize, priority_rank, PRIORITY_ORDER};
pub use resolve::{Resolution, Resolver, Response, StandingPolicies, VerdictSource};
pub use scan::{run_scan, Inventory, ScanOptions};
pub use session::{run_session, SessionEntry, SessionReport};
pub use settings::{
    default_settings_path, load_or_init, LoadedSettings, Settings, SettingsError,
    SETTINGS_FILE_NAME,
};
