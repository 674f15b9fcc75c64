use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::ArgAction;
use clap::{Args, Parser, Subcommand};
use file_consolidator_core::settings::SettingsFile;
use file_consolidator_core::{
    apply_flatten_plan, build_plan, collect_flatten_plan, default_plan_path,
    default_settings_path, human_bytes, load_or_init, load_plan, render_plan_markdown, run_scan,
    run_session, save_plan, ConsolidationPlan, ExecutionOutcome, Executor, FlattenOptions,
    LoadedSettings, Resolver, ScanOptions, SessionEntry, Verdict,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "file-consolidator",
    version,
    about = "Consolidate files from several directories into one target, reviewing each cleanup interactively."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan, review suggestions interactively, apply them, then flatten into the target.
    Run(RunArgs),
    /// Scan and write the ordered suggestions to a plan file without touching any file.
    Plan(PlanArgs),
    /// Review and apply a previously written plan.
    Apply(ApplyArgs),
    /// Show the effective settings, creating the defaults if needed.
    Settings(SettingsArgs),
}

#[derive(Debug, Args)]
struct ScanTargetArgs {
    /// Directory that receives the consolidated files. It is scanned as a source too.
    #[arg(value_name = "TARGET")]
    target: PathBuf,

    /// Directories whose files are consolidated into the target.
    #[arg(value_name = "SOURCE", required = true, num_args = 1..)]
    sources: Vec<PathBuf>,

    /// Exclude glob patterns (repeatable).
    #[arg(long = "exclude", value_name = "GLOB", num_args = 1.., action = ArgAction::Append)]
    exclude: Vec<String>,

    /// Maximum traversal depth (root is depth 0).
    #[arg(long)]
    max_depth: Option<usize>,

    /// Settings file. Defaults to ~/.clean_files.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    scan: ScanTargetArgs,

    /// Also write the plan JSON before reviewing it.
    #[arg(long, value_name = "FILE")]
    plan_output: Option<PathBuf>,

    /// Optional markdown summary output file.
    #[arg(long, value_name = "FILE")]
    md: Option<PathBuf>,

    /// Skip the final flattening pass.
    #[arg(long)]
    no_flatten: bool,
}

#[derive(Debug, Args)]
struct PlanArgs {
    #[command(flatten)]
    scan: ScanTargetArgs,

    /// Output plan path.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Optional markdown summary output file.
    #[arg(long, value_name = "FILE")]
    md: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ApplyArgs {
    /// Plan file written by `plan` or `run --plan-output`.
    #[arg(long, value_name = "FILE")]
    plan: PathBuf,

    /// Settings file. Defaults to ~/.clean_files.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Skip the final flattening pass.
    #[arg(long)]
    no_flatten: bool,
}

#[derive(Debug, Args)]
struct SettingsArgs {
    /// Settings file. Defaults to ~/.clean_files.
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_run_command(args),
        Commands::Plan(args) => run_plan_command(args),
        Commands::Apply(args) => run_apply_command(args),
        Commands::Settings(args) => run_settings_command(args),
    }
}

fn run_run_command(args: RunArgs) -> Result<()> {
    let RunArgs {
        scan,
        plan_output,
        md,
        no_flatten,
    } = args;

    let (loaded, plan) = scan_and_plan(&scan)?;
    write_outputs(&plan, plan_output.as_deref(), md.as_deref())?;
    print_listing(&plan);

    let stdin = io::stdin();
    let mut resolver = Resolver::new(stdin.lock(), io::stdout());
    review_plan(&plan, &loaded, &mut resolver)?;

    if !no_flatten {
        offer_flatten(&plan.target, &scan.sources, &loaded, &mut resolver)?;
    }
    Ok(())
}

fn run_plan_command(args: PlanArgs) -> Result<()> {
    let PlanArgs { scan, output, md } = args;

    let (_, plan) = scan_and_plan(&scan)?;
    let output = output.unwrap_or_else(default_plan_path);
    write_outputs(&plan, Some(output.as_path()), md.as_deref())?;
    print_listing(&plan);
    Ok(())
}

fn run_apply_command(args: ApplyArgs) -> Result<()> {
    let loaded = load_settings(args.settings)?;
    let plan = load_plan(&args.plan)?;
    if !plan.target.is_dir() {
        bail!(
            "plan target {} is not an existing directory",
            plan.target.display()
        );
    }
    println!(
        "Loaded plan {} ({} suggestion(s)) from {}",
        plan.run_id,
        plan.suggestions.len(),
        args.plan.display()
    );
    print_listing(&plan);

    let stdin = io::stdin();
    let mut resolver = Resolver::new(stdin.lock(), io::stdout());
    review_plan(&plan, &loaded, &mut resolver)?;

    if !args.no_flatten {
        offer_flatten(&plan.target, &plan.roots, &loaded, &mut resolver)?;
    }
    Ok(())
}

fn run_settings_command(args: SettingsArgs) -> Result<()> {
    let loaded = load_settings(args.settings)?;
    if loaded.created_default {
        println!("Created default settings at {}", loaded.path.display());
    } else {
        println!("Settings file: {}", loaded.path.display());
    }
    let payload = serde_json::to_string_pretty(&SettingsFile::from(&loaded.settings))
        .context("failed to serialize settings")?;
    println!("{payload}");
    Ok(())
}

fn load_settings(path: Option<PathBuf>) -> Result<LoadedSettings> {
    let path = match path {
        Some(path) => path,
        None => default_settings_path()?,
    };
    Ok(load_or_init(&path)?)
}

fn scan_and_plan(args: &ScanTargetArgs) -> Result<(LoadedSettings, ConsolidationPlan)> {
    if !args.target.is_dir() {
        bail!(
            "target {} is not an existing directory",
            args.target.display()
        );
    }
    let loaded = load_settings(args.settings.clone())?;

    let mut roots = vec![args.target.clone()];
    roots.extend(args.sources.iter().cloned());
    let options = ScanOptions {
        roots,
        excludes: args.exclude.clone(),
        excluded_paths: vec![loaded.path.clone()],
        max_depth: args.max_depth,
    };

    let inventory = run_scan(&options)?;
    println!(
        "Scanned {} root(s), {} file(s), {}, {} unreadable, {} warning(s).",
        inventory.metrics.scanned_roots,
        inventory.metrics.scanned_files,
        human_bytes(inventory.metrics.scanned_bytes),
        inventory.metrics.unreadable_files,
        inventory.warnings.len()
    );

    let plan = build_plan(&inventory, &loaded.settings, &args.target);
    Ok((loaded, plan))
}

fn write_outputs(plan: &ConsolidationPlan, plan_path: Option<&Path>, md: Option<&Path>) -> Result<()> {
    if let Some(path) = plan_path {
        save_plan(plan, path)?;
        println!("Plan written to {}", path.display());
    }
    if let Some(md_path) = md {
        fs::write(md_path, render_plan_markdown(plan)).with_context(|| {
            format!("failed to write markdown summary to {}", md_path.display())
        })?;
        println!("Markdown summary written to {}", md_path.display());
    }
    Ok(())
}

fn print_listing(plan: &ConsolidationPlan) {
    if plan.suggestions.is_empty() {
        println!("No suggestions: everything under {} looks tidy.", plan.target.display());
        return;
    }

    println!("{} suggestion(s):", plan.suggestions.len());
    for (index, suggestion) in plan.suggestions.iter().enumerate() {
        match &suggestion.destination_path {
            Some(destination) => println!(
                "{:>4}. [{}] {} -> {}",
                index + 1,
                suggestion.kind,
                suggestion.subject_path.display(),
                destination.display()
            ),
            None => println!(
                "{:>4}. [{}] {}",
                index + 1,
                suggestion.kind,
                suggestion.subject_path.display()
            ),
        }
    }
    println!(
        "Up to {} can be reclaimed by the suggested deletions.",
        human_bytes(plan.reclaimable_bytes)
    );
    for warning in &plan.warnings {
        println!("warning: {warning}");
    }
}

fn review_plan<R: BufRead, W: Write>(
    plan: &ConsolidationPlan,
    loaded: &LoadedSettings,
    resolver: &mut Resolver<R, W>,
) -> Result<()> {
    if plan.suggestions.is_empty() {
        return Ok(());
    }
    if !resolver.confirm("Review these suggestions now?") {
        println!("Nothing changed.");
        return Ok(());
    }

    let executor = Executor::new(loaded.settings.permissions);
    let total = plan.suggestions.len();
    let report = run_session(&plan.suggestions, resolver, &executor, |index, entry| {
        println!("[{}/{}] {}", index + 1, total, describe_entry(entry));
    });

    println!(
        "Done: {} performed, {} skipped, {} failed.",
        report.performed, report.skipped, report.failed
    );
    info!("review of plan {} finished", plan.run_id);
    Ok(())
}

fn describe_entry(entry: &SessionEntry) -> String {
    let suggestion = &entry.suggestion;
    match (&entry.verdict, &entry.outcome) {
        (Verdict::Skip, _) | (_, None) => format!(
            "skipped {} {}",
            suggestion.action,
            suggestion.subject_path.display()
        ),
        (Verdict::Perform, Some(ExecutionOutcome::Applied)) => match &suggestion.destination_path {
            Some(destination) => format!(
                "{} {} -> {}",
                suggestion.action,
                suggestion.subject_path.display(),
                destination.display()
            ),
            None => format!(
                "{} {}",
                suggestion.action,
                suggestion.subject_path.display()
            ),
        },
        (Verdict::Perform, Some(ExecutionOutcome::Failed { failure })) => {
            format!("{} failed: {failure}", suggestion.action)
        }
    }
}

fn offer_flatten<R: BufRead, W: Write>(
    target: &Path,
    sources: &[PathBuf],
    loaded: &LoadedSettings,
    resolver: &mut Resolver<R, W>,
) -> Result<()> {
    let plan = collect_flatten_plan(&FlattenOptions {
        target: target.to_path_buf(),
        sources: sources.to_vec(),
        excluded_paths: vec![loaded.path.clone()],
    })?;

    for conflict in &plan.conflicts {
        println!(
            "conflict: {} stays put ({})",
            conflict.source.display(),
            conflict.detail
        );
    }
    if plan.is_empty() {
        println!("Nothing left to flatten into {}.", plan.target.display());
        return Ok(());
    }

    println!(
        "{} file(s) can be moved into {}:",
        plan.moves.len(),
        plan.target.display()
    );
    for planned in &plan.moves {
        println!("  {}", planned.source.display());
    }
    if !resolver.confirm("Move them all and remove the emptied directories?") {
        println!("Flattening skipped.");
        return Ok(());
    }

    let executor = Executor::new(loaded.settings.permissions);
    let report = apply_flatten_plan(&plan, &executor);
    for failure in &report.failures {
        println!("failed: {} ({})", failure.source.display(), failure.failure);
    }
    println!(
        "Flattened {} file(s); {} conflict(s), {} failure(s), {} empty director(ies) removed.",
        report.moved.len(),
        report.conflicts.len(),
        report.failures.len(),
        report.pruned_directories.len()
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
