use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use treecheck_common::{
    default_config_path, load_config, save_config, AppConfig, ComparisonResult, Status, Summary,
};
use treecheck_core::cleanup::remove_dir_with_retry;
use treecheck_core::report::sort_results;
use treecheck_core::{prepare_reference, write_reports, ComparisonEngine, ExclusionMatcher, JsonReport};

/// Exit code when `--strict` is set and alerts were found
const EXIT_ALERTS: i32 = 2;

#[derive(Parser)]
#[command(name = "treecheck")]
#[command(author = "treecheck Contributors")]
#[command(version)]
#[command(about = "Verify an installed file tree against a known-good reference", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config file, if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log per-entry decisions
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a local tree against a reference directory or .zip archive
    Analyze {
        /// Installed tree to verify
        local: PathBuf,

        /// Known-good tree: a directory or a .zip archive
        reference: PathBuf,

        /// File with one exclusion rule per line
        #[arg(short = 'x', long)]
        exclusions: Option<PathBuf>,

        /// Extra exclusion rule (can be specified multiple times)
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Number of comparison workers
        #[arg(short = 'j', long)]
        workers: Option<usize>,

        /// Directory for the text reports
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Directory where .zip references are extracted
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Do not write report files
        #[arg(long)]
        no_report: bool,

        /// Show only MODIFIED, MISSING and EXTRA entries
        #[arg(short = 'a', long)]
        alerts_only: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        /// Exit with status 2 when any alert is found
        #[arg(long)]
        strict: bool,

        /// Disable ANSI colors in output
        #[arg(long)]
        no_color: bool,
    },

    /// Remove extracted references and reports
    Clean,

    /// Write a configuration file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

struct AnalyzeArgs {
    local: PathBuf,
    reference: PathBuf,
    exclusions: Option<PathBuf>,
    exclude: Vec<String>,
    workers: Option<usize>,
    report_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    no_report: bool,
    alerts_only: bool,
    json: bool,
    strict: bool,
    no_color: bool,
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing to stderr (so JSON output can go cleanly to stdout)
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config_path = cli.config.clone();
    let outcome = match cli.command {
        Commands::Analyze {
            local,
            reference,
            exclusions,
            exclude,
            workers,
            report_dir,
            work_dir,
            no_report,
            alerts_only,
            json,
            strict,
            no_color,
        } => run_analyze(
            config_path.as_deref(),
            AnalyzeArgs {
                local,
                reference,
                exclusions,
                exclude,
                workers,
                report_dir,
                work_dir,
                no_report,
                alerts_only,
                json,
                strict,
                no_color,
            },
        ),
        Commands::Clean => run_clean(config_path.as_deref()).map(|_| 0),
        Commands::InitConfig { force } => run_init_config(config_path.as_deref(), force).map(|_| 0),
    };

    match outcome {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn run_analyze(config_path: Option<&Path>, args: AnalyzeArgs) -> anyhow::Result<i32> {
    let loaded = load_config(config_path)?;
    let config = apply_overrides(loaded.config, &args);

    info!("Comparing:");
    info!("  Local:     {}", args.local.display());
    info!("  Reference: {}", args.reference.display());

    let exclusion_file = args
        .exclusions
        .clone()
        .unwrap_or_else(|| config.exclusion_file.clone());
    if args.exclusions.is_some() && !exclusion_file.exists() {
        bail!("Exclusion file does not exist: {}", exclusion_file.display());
    }
    let mut exclusions = ExclusionMatcher::from_file(&exclusion_file)?;
    exclusions.extend(&config.exclude);
    info!("Loaded {} exclusion rules", exclusions.len());

    let reference_root = prepare_reference(&args.reference, &config.work_dir, &args.local)
        .with_context(|| format!("Cannot prepare reference {}", args.reference.display()))?;

    let progress = progress_bar(args.json);
    let engine = ComparisonEngine::new().with_workers(config.workers);
    let mut results = engine.compare_with_progress(
        &args.local,
        &reference_root,
        &exclusions,
        |_| progress.inc(1),
    )?;
    progress.finish_and_clear();
    sort_results(&mut results);

    let summary = Summary::from_results(&results);

    if !args.no_report {
        write_reports(&config.report_dir, &results)?;
    }

    if args.json {
        let report = JsonReport::new(&args.local, &reference_root, &results, args.alerts_only);
        println!("{}", report.to_json()?);
    } else {
        let use_color = !args.no_color && std::io::stdout().is_terminal();
        print_results(&results, &summary, args.alerts_only, use_color);
    }

    if args.strict && summary.alerts() > 0 {
        return Ok(EXIT_ALERTS);
    }
    Ok(0)
}

fn apply_overrides(mut config: AppConfig, args: &AnalyzeArgs) -> AppConfig {
    config.exclude.extend(args.exclude.iter().cloned());
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    if let Some(report_dir) = &args.report_dir {
        config.report_dir = report_dir.clone();
    }
    if let Some(work_dir) = &args.work_dir {
        config.work_dir = work_dir.clone();
    }
    config
}

fn progress_bar(json: bool) -> ProgressBar {
    if json || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {pos} paths classified [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn status_color(status: Status) -> &'static str {
    match status {
        Status::Ok => "\x1b[32m",       // Green
        Status::Modified => "\x1b[31m", // Red
        Status::Missing => "\x1b[33m",  // Yellow
        Status::Extra => "\x1b[35m",    // Magenta
    }
}

fn render_line(result: &ComparisonResult, use_color: bool) -> String {
    if use_color {
        format!(
            "{}[{}]\x1b[0m {}",
            status_color(result.status),
            result.status,
            result.path
        )
    } else {
        result.to_string()
    }
}

fn print_results(results: &[ComparisonResult], summary: &Summary, alerts_only: bool, use_color: bool) {
    println!("\n{}", "=".repeat(80));
    println!("Integrity Results");
    println!("{}", "=".repeat(80));

    for result in results {
        if alerts_only && !result.status.is_alert() {
            continue;
        }
        println!("{}", render_line(result, use_color));
    }

    println!("\n{}", "=".repeat(80));
    println!("Summary:");
    println!("  Total entries:   {}", summary.total);
    println!("  Unchanged:       {}", summary.ok);
    println!("  Modified:        {}", summary.modified);
    println!("  Missing:         {}", summary.missing);
    println!("  Extra:           {}", summary.extra);
    println!("{}", "=".repeat(80));
}

fn run_clean(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?.config;

    for dir in [&config.work_dir, &config.report_dir] {
        if remove_dir_with_retry(dir)? {
            info!("Removed {}", dir.display());
        } else {
            info!("Nothing to remove at {}", dir.display());
        }
    }
    Ok(())
}

fn run_init_config(config_path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    if path.exists() && !force {
        bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }

    save_config(&path, &AppConfig::default())?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}
