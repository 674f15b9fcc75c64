use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::classify::{classify, ClassifyContext};
use crate::model::{ConsolidationPlan, InventoryRecord, KindCount, Suggestion, PLAN_VERSION};
use crate::prioritize::{prioritize, PRIORITY_ORDER};
use crate::scan::Inventory;
use crate::settings::Settings;

/// Classifies and orders the scanned inventory. Nothing on disk changes.
pub fn build_plan(inventory: &Inventory, settings: &Settings, target: &Path) -> ConsolidationPlan {
    let target = target
        .canonicalize()
        .unwrap_or_else(|_| target.to_path_buf());
    let context = ClassifyContext {
        target_dir: &target,
        settings,
    };

    let mut suggestions = classify(&inventory.records, &context);
    prioritize(&mut suggestions);

    let kind_counts = PRIORITY_ORDER
        .iter()
        .map(|kind| KindCount {
            kind: *kind,
            count: suggestions
                .iter()
                .filter(|suggestion| suggestion.kind == *kind)
                .count() as u64,
        })
        .filter(|entry| entry.count > 0)
        .collect::<Vec<_>>();
    let reclaimable_bytes = reclaimable_bytes(&inventory.records, &suggestions);

    info!(
        "plan built: {} suggestion(s), {} byte(s) reclaimable",
        suggestions.len(),
        reclaimable_bytes
    );

    ConsolidationPlan {
        plan_version: PLAN_VERSION.to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        run_id: Uuid::new_v4().to_string(),
        target,
        roots: inventory.roots.clone(),
        scan_metrics: inventory.metrics.clone(),
        kind_counts,
        reclaimable_bytes,
        suggestions,
        warnings: inventory.warnings.clone(),
    }
}

fn reclaimable_bytes(records: &[InventoryRecord], suggestions: &[Suggestion]) -> u64 {
    let deleted = suggestions
        .iter()
        .filter(|suggestion| suggestion.is_delete())
        .map(|suggestion| suggestion.subject_path.as_path())
        .collect::<HashSet<_>>();
    records
        .iter()
        .filter(|record| deleted.contains(record.path.as_path()))
        .map(|record| record.size_bytes)
        .sum()
}

pub fn save_plan(plan: &ConsolidationPlan, path: &Path) -> Result<()> {
    let payload = serde_json::to_string_pretty(plan).context("failed to serialize plan")?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write plan to {}", path.display()))?;
    info!("plan written to {}", path.display());
    Ok(())
}

pub fn load_plan(path: &Path) -> Result<ConsolidationPlan> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    let plan: ConsolidationPlan = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse plan {}", path.display()))?;
    if plan.plan_version != PLAN_VERSION {
        warn!(
            "plan {} was written with format {}, this build reads {}",
            path.display(),
            plan.plan_version,
            PLAN_VERSION
        );
    }
    Ok(plan)
}

pub fn default_plan_path() -> PathBuf {
    PathBuf::from("consolidation-plan.json")
}
