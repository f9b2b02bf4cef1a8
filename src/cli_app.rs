//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use signal_hook::consts::{SIGINT, SIGTERM};
use thiserror::Error;

use nas_blob_reconciler::core::config::Config;
use nas_blob_reconciler::core::errors::NbrError;
use nas_blob_reconciler::core::paths;
use nas_blob_reconciler::inventory::builder::{BuildReport, InventoryBuilder};
use nas_blob_reconciler::inventory::listing::ListingProvider;
use nas_blob_reconciler::inventory::local::LocalFsProvider;
use nas_blob_reconciler::inventory::provider::NamespaceProvider;
use nas_blob_reconciler::inventory::snapshot::AttributeSnapshot;
use nas_blob_reconciler::logger::activity::{ActivityEvent, ActivityLog};
use nas_blob_reconciler::materialize::copy::{CopyOptions, CopyReport, Materializer};
use nas_blob_reconciler::reconcile::engine::{DateMismatchPolicy, DiffSummary, Reconciler};
use nas_blob_reconciler::reconcile::output::{read_flat, write_flat};

/// NAS Blob Reconciler: inventory a file share and an object store, diff them,
/// and stage the missing files for upload.
#[derive(Debug, Parser)]
#[command(
    name = "nbr",
    author,
    version,
    about = "NAS Blob Reconciler - inventory, diff and stage uploads",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Inventory a local directory tree into a snapshot.
    Local(LocalArgs),
    /// Inventory an object-store container from a listing export.
    Remote(RemoteArgs),
    /// Reconcile a source snapshot against a compare snapshot.
    Diff(DiffArgs),
    /// Write the keys of a diff as a sorted, lower-cased list.
    Flatten(FlattenArgs),
    /// Copy the files named by a flat list into a staging directory.
    Copy(CopyArgs),
    /// View and validate configuration.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct LocalArgs {
    /// Directory to inventory.
    #[arg(value_name = "DIR", default_value = ".")]
    root: PathBuf,
    /// Snapshot output path (defaults to `[output].local_snapshot`).
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Maximum concurrent tasks.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..=1024))]
    concurrency: Option<u16>,
    /// Follow symbolic links while crawling.
    #[arg(long)]
    follow_symlinks: bool,
    /// Stop admitting work after this many seconds (0 disables).
    #[arg(long, value_name = "SECONDS")]
    deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct RemoteArgs {
    /// Object listing export (JSON Lines or JSON array).
    #[arg(short, long, value_name = "PATH")]
    listing: PathBuf,
    /// Container the listing was taken from.
    #[arg(short, long, value_name = "NAME")]
    container: String,
    /// Only inventory objects under this prefix.
    #[arg(short, long, value_name = "PREFIX", default_value = "")]
    prefix: String,
    /// Snapshot output path (defaults to `[output].remote_snapshot`).
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Maximum concurrent tasks.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..=1024))]
    concurrency: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct DiffArgs {
    /// Source snapshot (defaults to `[output].local_snapshot`).
    #[arg(short, long, value_name = "PATH")]
    source: Option<PathBuf>,
    /// Compare snapshot (defaults to `[output].remote_snapshot`).
    #[arg(short, long, value_name = "PATH")]
    compare: Option<PathBuf>,
    /// Restrict the compare side to keys under this prefix.
    #[arg(short, long, value_name = "PREFIX")]
    prefix: Option<String>,
    /// Treat modification-date mismatches as differences.
    #[arg(long)]
    include_date_mismatch: bool,
    /// Diff output path (defaults to `[output].diff`).
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Summary output path (defaults to `[output].summary`).
    #[arg(long, value_name = "PATH")]
    summary: Option<PathBuf>,
    /// Also write the flat key list.
    #[arg(long)]
    flatten: bool,
}

#[derive(Debug, Clone, Args)]
struct FlattenArgs {
    /// Diff snapshot to flatten (defaults to `[output].diff`).
    #[arg(short, long, value_name = "PATH")]
    diff: Option<PathBuf>,
    /// Flat list output path (defaults to `[output].flat`).
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CopyArgs {
    /// Root the listed keys are resolved against.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    source: PathBuf,
    /// Staging directory receiving the copies.
    #[arg(short, long, value_name = "DIR")]
    destination: PathBuf,
    /// Flat key list (defaults to `[output].flat`).
    #[arg(short, long, value_name = "PATH")]
    list: Option<PathBuf>,
    /// Print the plan without copying.
    #[arg(long)]
    dry_run: bool,
    /// Abort on the first failed copy.
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Print the config file path in use.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration and print its hash.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }

    /// Error code for the activity log. Library errors keep their `NBR-xxxx` tag.
    fn code(&self) -> String {
        let message = self.to_string();
        message
            .strip_prefix('[')
            .and_then(|rest| rest.split_once(']'))
            .map(|(code, _)| code)
            .filter(|code| code.starts_with("NBR-"))
            .map_or_else(
                || format!("NBR-EXIT-{}", self.exit_code()),
                str::to_string,
            )
    }
}

impl From<NbrError> for CliError {
    fn from(err: NbrError) -> Self {
        match err {
            NbrError::InvalidConfig { .. }
            | NbrError::MissingConfig { .. }
            | NbrError::ConfigParse { .. }
            | NbrError::InvalidRoot { .. }
            | NbrError::SnapshotParse { .. } => Self::User(err.to_string()),
            NbrError::Serialization { .. } => Self::Internal(err.to_string()),
            NbrError::Provider { .. } | NbrError::Io { .. } | NbrError::Runtime { .. } => {
                Self::Runtime(err.to_string())
            }
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
        command => {
            let config = Config::load(cli.config.as_deref())?;
            let activity = open_activity_log(&config);
            let result = match command {
                Command::Local(args) => run_local(cli, &config, &activity, args),
                Command::Remote(args) => run_remote(cli, &config, &activity, args),
                Command::Diff(args) => run_diff(cli, &config, &activity, args),
                Command::Flatten(args) => run_flatten(cli, &config, args),
                Command::Copy(args) => run_copy(cli, &config, &activity, args),
                Command::Config(_) | Command::Completions(_) => Ok(()),
            };
            match &result {
                Err(CliError::Partial(_)) | Ok(()) => {}
                Err(err) => activity.record(&ActivityEvent::Error {
                    code: err.code(),
                    message: err.to_string(),
                }),
            }
            activity.flush();
            result
        }
    }
}

fn open_activity_log(config: &Config) -> ActivityLog {
    if config.paths.activity_log_enabled {
        ActivityLog::open(&config.paths.activity_log)
    } else {
        ActivityLog::disabled()
    }
}

/// Exit status when a second interrupt arrives before the build drains.
const SECOND_SIGNAL_EXIT_CODE: i32 = 130;

/// SIGINT/SIGTERM set the returned flag; the builder stops admitting work.
/// A second signal exits the process.
fn install_stop_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    for (signal, name) in [(SIGINT, "SIGINT"), (SIGTERM, "SIGTERM")] {
        // Order matters: the exit check sees the flag before this signal sets it,
        // so only a second signal terminates.
        let registered = signal_hook::flag::register_conditional_shutdown(
            signal,
            SECOND_SIGNAL_EXIT_CODE,
            Arc::clone(&flag),
        )
        .and_then(|_| signal_hook::flag::register(signal, Arc::clone(&flag)));
        if let Err(e) = registered {
            eprintln!("[NBR-SIGNAL] failed to register {name}: {e}");
        }
    }
    flag
}

// ──────────────────── inventory ────────────────────

fn run_local(
    cli: &Cli,
    config: &Config,
    activity: &ActivityLog,
    args: &LocalArgs,
) -> Result<(), CliError> {
    let mut config = config.clone();
    if let Some(n) = args.concurrency {
        config.inventory.concurrency = usize::from(n);
    }
    if args.follow_symlinks {
        config.inventory.follow_symlinks = true;
    }
    if let Some(secs) = args.deadline_secs {
        config.inventory.deadline_secs = secs;
    }

    let provider =
        LocalFsProvider::new(&args.root, config.inventory.follow_symlinks)?.with_verbose(cli.verbose);
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| config.output.local_snapshot.clone());
    let root = paths::display_root(&args.root);
    run_inventory(cli, &config, activity, "local", &root, &provider, &output)
}

fn run_remote(
    cli: &Cli,
    config: &Config,
    activity: &ActivityLog,
    args: &RemoteArgs,
) -> Result<(), CliError> {
    let mut config = config.clone();
    if let Some(n) = args.concurrency {
        config.inventory.concurrency = usize::from(n);
    }

    let prefix = args.prefix.trim_matches('/');
    let provider = ListingProvider::load(&args.listing, &args.container, prefix)?;
    if cli.verbose && output_mode(cli) == OutputMode::Human {
        eprintln!(
            "Indexed {} objects from {}",
            provider.object_count(),
            args.listing.display()
        );
    }
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| config.output.remote_snapshot.clone());
    let root = if prefix.is_empty() {
        args.container.clone()
    } else {
        format!("{}/{prefix}", args.container)
    };
    run_inventory(cli, &config, activity, "remote", &root, &provider, &output)
}

fn run_inventory(
    cli: &Cli,
    config: &Config,
    activity: &ActivityLog,
    command: &str,
    root: &str,
    provider: &dyn NamespaceProvider,
    output: &Path,
) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let rules = config.ignore_rules()?;
    activity.record(&ActivityEvent::BuildStarted {
        command: command.to_string(),
        root: root.to_string(),
        config_hash: config.stable_hash()?,
    });

    let stop = install_stop_flag();
    let mut builder =
        InventoryBuilder::new(provider, &rules, config.build_config()).with_stop_flag(Arc::clone(&stop));
    let show_progress = mode == OutputMode::Human && !cli.quiet;
    if show_progress {
        builder = builder.with_progress(|p| {
            if p.processed % 64 == 0 || p.is_complete() {
                eprint!("\rProgress: {}/{}", p.processed, p.total);
            }
        });
    }
    let report = builder.build();
    if show_progress {
        eprintln!(
            "\rProgress: {}/{}",
            report.progress.processed, report.progress.total
        );
    }

    report.snapshot.save(output)?;
    activity.record_build(command, root, &report);
    let interrupted = stop.load(Ordering::Relaxed);

    match mode {
        OutputMode::Human => {
            if !cli.quiet {
                print_build_report(cli, command, root, output, &report, interrupted);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": command,
                "root": root,
                "output": output.to_string_lossy(),
                "interrupted": interrupted,
                "summary": report.summary(),
                "failures": report.failures,
            });
            write_json_line(&payload)?;
        }
    }

    if report.is_partial() {
        return Err(CliError::Partial(format!(
            "{command} inventory of {root} is partial: {} subtrees skipped, {} lookups failed, {} tasks refused",
            report.skipped_nodes, report.failed_lookups, report.refused
        )));
    }
    Ok(())
}

fn print_build_report(
    cli: &Cli,
    command: &str,
    root: &str,
    output: &Path,
    report: &BuildReport,
    interrupted: bool,
) {
    let summary = report.summary();
    println!(
        "{} {} inventory of {}",
        if report.is_partial() {
            "Partial".yellow().bold()
        } else {
            "Complete".green().bold()
        },
        command,
        root.bold()
    );
    println!(
        "  Entries: {} ({})",
        summary.entries,
        format_bytes(summary.total_bytes)
    );
    println!("  Ignored: {}", summary.ignored);
    if summary.duplicates > 0 {
        println!("  Duplicate keys: {}", summary.duplicates);
    }
    println!("  Elapsed: {} ms", summary.elapsed_ms);
    println!("  Snapshot: {}", output.display());

    if report.is_partial() {
        println!(
            "  {} {} subtrees skipped, {} lookups failed, {} tasks refused",
            "Warning:".yellow(),
            summary.skipped_nodes,
            summary.failed_lookups,
            summary.refused
        );
        if interrupted {
            println!("  {}", "Interrupted: build stopped admitting new work.".yellow());
        }
        if cli.verbose {
            for failure in &report.failures {
                println!(
                    "    [{}] {:?} {}: {}",
                    failure.code, failure.stage, failure.key, failure.message
                );
            }
        }
    }
}

// ──────────────────── diff / flatten ────────────────────

fn run_diff(
    cli: &Cli,
    config: &Config,
    activity: &ActivityLog,
    args: &DiffArgs,
) -> Result<(), CliError> {
    let mut options = config.reconcile_options();
    if let Some(prefix) = &args.prefix {
        options = options.with_prefix(prefix);
    }
    if args.include_date_mismatch {
        options.date_policy = DateMismatchPolicy::IncludeInDiff;
    }

    let source_path = args
        .source
        .clone()
        .unwrap_or_else(|| config.output.local_snapshot.clone());
    let compare_path = args
        .compare
        .clone()
        .unwrap_or_else(|| config.output.remote_snapshot.clone());
    let diff_path = args.output.clone().unwrap_or_else(|| config.output.diff.clone());
    let summary_path = args
        .summary
        .clone()
        .unwrap_or_else(|| config.output.summary.clone());

    let source = AttributeSnapshot::load(&source_path)?;
    let compare = AttributeSnapshot::load(&compare_path)?;
    let outcome = Reconciler::new(options).reconcile(&source, &compare);
    outcome.save(&diff_path, &summary_path)?;

    let flat = if args.flatten {
        let flat_path = config.output.flat.clone();
        let count = write_flat(&outcome.diff, &flat_path)?;
        Some((flat_path, count))
    } else {
        None
    };

    activity.record(&ActivityEvent::DiffCompleted {
        source: source_path.display().to_string(),
        compare: compare_path.display().to_string(),
        summary: outcome.summary,
    });

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_diff_summary(&outcome.summary);
                println!("  Diff: {}", diff_path.display());
                println!("  Summary: {}", summary_path.display());
                if let Some((path, count)) = &flat {
                    println!("  Flat list: {} ({count} keys)", path.display());
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "diff",
                "source": source_path.to_string_lossy(),
                "compare": compare_path.to_string_lossy(),
                "diff": diff_path.to_string_lossy(),
                "summary_path": summary_path.to_string_lossy(),
                "flat": flat.as_ref().map(|(path, _)| path.to_string_lossy()),
                "summary": outcome.summary,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_diff_summary(summary: &DiffSummary) {
    let differing = summary.missing_keys_count + summary.different_files_count;
    let headline = if differing == 0 {
        "In sync".green().bold()
    } else {
        "Out of sync".yellow().bold()
    };
    println!(
        "{headline}: {} source entries, {} compare entries",
        summary.total_source_count, summary.total_compare_count
    );
    println!("  Missing: {}", summary.missing_keys_count);
    println!(
        "  Different: {} ({} size mismatches)",
        summary.different_files_count, summary.size_mismatch_count
    );
    println!("  Date mismatches: {}", summary.modified_date_mismatch);
    println!(
        "  Diff size: {} ({} GiB)",
        format_bytes(summary.total_diff_bytes),
        summary.total_diff_size
    );
    if summary.case_collisions > 0 {
        println!(
            "  {} {} keys collided after case folding",
            "Warning:".yellow(),
            summary.case_collisions
        );
    }
}

fn run_flatten(cli: &Cli, config: &Config, args: &FlattenArgs) -> Result<(), CliError> {
    let diff_path = args.diff.clone().unwrap_or_else(|| config.output.diff.clone());
    let output = args.output.clone().unwrap_or_else(|| config.output.flat.clone());

    let diff = AttributeSnapshot::load(&diff_path)?;
    let count = write_flat(&diff, &output)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                println!("Wrote {count} keys to {}", output.display());
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "flatten",
                "diff": diff_path.to_string_lossy(),
                "output": output.to_string_lossy(),
                "keys": count,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── copy ────────────────────

fn run_copy(
    cli: &Cli,
    config: &Config,
    activity: &ActivityLog,
    args: &CopyArgs,
) -> Result<(), CliError> {
    let list_path = args.list.clone().unwrap_or_else(|| config.output.flat.clone());
    let keys = read_flat(&list_path)?;
    let materializer = Materializer::new(
        &args.source,
        &args.destination,
        CopyOptions {
            dry_run: args.dry_run,
            fail_fast: args.fail_fast,
        },
    )?;
    let report = materializer.run(&keys)?;
    record_copy(activity, &report);

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_copy_report(cli, &report);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": if report.dry_run { "copy --dry-run" } else { "copy" },
                "list": list_path.to_string_lossy(),
                "destination": args.destination.to_string_lossy(),
                "copied": report.copied(),
                "bytes": report.total_bytes(),
                "items": report.items,
                "failures": report.failures,
            });
            write_json_line(&payload)?;
        }
    }

    if report.is_partial() {
        return Err(CliError::Partial(format!(
            "{} of {} copies failed",
            report.failures.len(),
            report.failures.len() + report.copied()
        )));
    }
    Ok(())
}

fn record_copy(activity: &ActivityLog, report: &CopyReport) {
    for failure in &report.failures {
        activity.record(&ActivityEvent::CopyFailed {
            key: failure.key.clone(),
            code: failure.code.to_string(),
            message: failure.message.clone(),
        });
    }
    activity.record(&ActivityEvent::CopyCompleted {
        copied: report.copied() as u64,
        bytes: report.total_bytes(),
        failures: report.failures.len() as u64,
        dry_run: report.dry_run,
    });
}

fn print_copy_report(cli: &Cli, report: &CopyReport) {
    if report.dry_run {
        for item in &report.items {
            println!(
                "would copy {} -> {} ({})",
                item.source.display(),
                item.destination.display(),
                format_bytes(item.bytes)
            );
        }
    } else if cli.verbose {
        for item in &report.items {
            println!("copied {} -> {}", item.source.display(), item.destination.display());
        }
    }
    for failure in &report.failures {
        println!("{} [{}] {}: {}", "failed".red(), failure.code, failure.key, failure.message);
    }
    let verb = if report.dry_run { "Planned" } else { "Copied" };
    println!(
        "{verb} {} files ({}), {} failures",
        report.copied(),
        format_bytes(report.total_bytes()),
        report.failures.len()
    );
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => println!("{}", config.to_toml()?),
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

// ──────────────────── output helpers ────────────────────

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("NBR_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "nbr",
            "--config",
            "/tmp/nbr.toml",
            "--json",
            "--no-color",
            "-v",
            "local",
            "/srv/share",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["nbr", "diff", "--json", "--no-color", "-q"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["nbr", "local", "/data", "--concurrency", "8", "--follow-symlinks"],
            vec!["nbr", "local", "-o", "out.json", "--deadline-secs", "30"],
            vec!["nbr", "remote", "--listing", "objects.jsonl", "--container", "media"],
            vec!["nbr", "remote", "-l", "objects.json", "-c", "media", "-p", "photos/2024"],
            vec!["nbr", "diff", "-s", "a.json", "-c", "b.json", "--include-date-mismatch"],
            vec!["nbr", "diff", "--prefix", "photos", "--flatten"],
            vec!["nbr", "flatten", "--diff", "diff.json", "-o", "diff_flat"],
            vec!["nbr", "copy", "-d", "/staging", "--dry-run"],
            vec!["nbr", "copy", "-s", "/share", "-d", "/staging", "-l", "keys", "--fail-fast"],
            vec!["nbr", "config", "validate"],
            vec!["nbr", "config"],
            vec!["nbr", "completions", "bash"],
        ];

        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse {case:?}: {parsed:?}");
        }
    }

    #[test]
    fn rejects_invalid_arguments() {
        assert!(Cli::try_parse_from(["nbr", "local", "--concurrency", "0"]).is_err());
        assert!(Cli::try_parse_from(["nbr", "copy"]).is_err());
        assert!(Cli::try_parse_from(["nbr", "remote", "--listing", "x"]).is_err());
        assert!(Cli::try_parse_from(["nbr", "-v", "-q", "diff"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some(" Auto "), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("bogus"), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn format_bytes_picks_binary_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024 * 1024), "2.0 TB");
    }

    #[test]
    fn library_errors_map_to_exit_codes() {
        let user: CliError = NbrError::InvalidConfig {
            details: "bad".into(),
        }
        .into();
        assert_eq!(user.exit_code(), 1);
        assert_eq!(user.code(), "NBR-1001");

        let parse: CliError = NbrError::SnapshotParse {
            path: PathBuf::from("diff.json"),
            details: "eof".into(),
        }
        .into();
        assert_eq!(parse.exit_code(), 1);

        let io: CliError = NbrError::io("x", io::Error::other("denied")).into();
        assert_eq!(io.exit_code(), 2);
        assert_eq!(io.code(), "NBR-3002");

        let internal: CliError = NbrError::Serialization {
            context: "json",
            details: "x".into(),
        }
        .into();
        assert_eq!(internal.exit_code(), 3);

        assert_eq!(CliError::Partial("p".into()).exit_code(), 4);
        assert_eq!(CliError::Partial("p".into()).code(), "NBR-EXIT-4");
    }

    #[test]
    fn first_signal_sets_stop_flag_without_exiting() {
        let flag = install_stop_flag();
        assert!(!flag.load(Ordering::SeqCst));

        signal_hook::low_level::raise(SIGTERM).unwrap();

        // Still running: the conditional exit only fires once the flag is set.
        assert!(flag.load(Ordering::SeqCst));
    }
}
