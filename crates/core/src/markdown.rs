use crate::model::ConsolidationPlan;

pub fn render_plan_markdown(plan: &ConsolidationPlan) -> String {
    let mut out = String::new();
    out.push_str("# File Consolidation Plan\n\n");
    out.push_str(&format!(
        "- Plan version: `{}`\n- Generated at: `{}`\n- Run id: `{}`\n- Target: `{}`\n- Scan roots: `{}`\n- Scanned: {} file(s) in {} directories, {}\n- Unreadable files: {}\n- Scan elapsed: `{} ms`\n\n",
        plan.plan_version,
        plan.generated_at,
        plan.run_id,
        plan.target.display(),
        plan.roots
            .iter()
            .map(|root| root.display().to_string())
            .collect::<Vec<_>>()
            .join("`, `"),
        plan.scan_metrics.scanned_files,
        plan.scan_metrics.scanned_directories,
        human_bytes(plan.scan_metrics.scanned_bytes),
        plan.scan_metrics.unreadable_files,
        plan.scan_metrics.elapsed_ms
    ));

    out.push_str("## Summary\n\n");
    if plan.kind_counts.is_empty() {
        out.push_str("Nothing to clean up.\n\n");
    } else {
        out.push_str("| Kind | Suggestions |\n|---|---|\n");
        for entry in &plan.kind_counts {
            out.push_str(&format!("| `{}` | {} |\n", entry.kind, entry.count));
        }
        out.push_str(&format!(
            "\nDeleting every suggested file reclaims {}.\n\n",
            human_bytes(plan.reclaimable_bytes)
        ));
    }

    out.push_str("## Suggestions\n\n");
    if plan.suggestions.is_empty() {
        out.push_str("No suggestions generated.\n\n");
    } else {
        for (index, suggestion) in plan.suggestions.iter().enumerate() {
            out.push_str(&format!(
                "{}. `{}` {} `{}`",
                index + 1,
                suggestion.kind,
                suggestion.action,
                suggestion.subject_path.display()
            ));
            if let Some(destination) = &suggestion.destination_path {
                out.push_str(&format!(" -> `{}`", destination.display()));
            }
            out.push_str(&format!("\n   - {}\n", suggestion.reason));
        }
        out.push('\n');
    }

    if !plan.warnings.is_empty() {
        out.push_str("## Warnings\n\n");
        for warning in &plan.warnings {
            out.push_str(&format!("- {}\n", warning));
        }
    }

    out
}

pub fn human_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value == 0 {
        return "0 B".to_string();
    }
    let mut size = value as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
