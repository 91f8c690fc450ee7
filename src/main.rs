use anyhow::Result;
use clap::{Parser, Subcommand};
use garnish::config::{self, PipelineConfig};
use garnish::gemini::{GeminiClient, ThreadSleeper};
use garnish::ledger::{Ledger, RunState};
use garnish::pipeline;
use garnish::util::epoch_ms;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "garnish", version, about = "LM-driven markdown heading groomer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the corpus and rewrite changed documents via the LM
    Run(RunArgs),
    /// Print ledger and run-state summary without touching the corpus
    Status(StatusArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Corpus root directory
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Directory for the ledger and run-state files (default: <root>/.garnish)
    #[arg(long, value_name = "PATH")]
    state_dir: Option<PathBuf>,

    /// Path prefix (relative to the root) to leave untouched; repeatable
    #[arg(
        long = "exclude",
        value_name = "PREFIX",
        default_values_t = vec!["ROUGH NOTES".to_string(), "RESOURCES".to_string()]
    )]
    exclude: Vec<String>,

    /// Gemini model name
    #[arg(long, default_value = config::DEFAULT_MODEL)]
    model: String,

    /// Gemini API base endpoint
    #[arg(long, default_value = config::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Maximum transformation attempts per document
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    /// Base retry delay in milliseconds
    #[arg(long, default_value_t = 1000)]
    base_delay_ms: u64,

    /// Maximum random jitter added to each retry delay, in milliseconds
    #[arg(long, default_value_t = 1000)]
    max_jitter_ms: u64,

    /// Re-process unchanged documents after this many days (0 disables)
    #[arg(long, default_value_t = 7)]
    refresh_days: u64,

    /// Minimum hours between runs
    #[arg(long, default_value_t = 24)]
    cadence_hours: u64,

    /// Run even if the cadence has not elapsed
    #[arg(long)]
    force: bool,

    /// Walk the full decision path without writing files or state
    #[arg(long)]
    dry_run: bool,
}

#[derive(Parser, Debug)]
struct StatusArgs {
    /// Corpus root directory
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Directory for the ledger and run-state files (default: <root>/.garnish)
    #[arg(long, value_name = "PATH")]
    state_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Status(args) => cmd_status(args),
    }
}

fn cmd_run(args: RunArgs) -> Result<()> {
    // Credential check first: a missing key must abort before any file
    // is read, with a clear report instead of an endless retry loop.
    let api_key = config::api_key_from_env()?;

    let state_dir = args
        .state_dir
        .unwrap_or_else(|| args.root.join(".garnish"));
    let config = PipelineConfig {
        corpus_root: args.root,
        state_dir,
        excluded_prefixes: args.exclude.into_iter().map(PathBuf::from).collect(),
        model: args.model,
        endpoint: args.endpoint,
        max_attempts: args.max_attempts,
        base_delay_ms: args.base_delay_ms,
        max_jitter_ms: args.max_jitter_ms,
        refresh_days: args.refresh_days,
        cadence_hours: args.cadence_hours,
        force: args.force,
        dry_run: args.dry_run,
    };
    config.validate()?;

    let client = GeminiClient::new(api_key, config.model.clone(), config.endpoint.clone());
    let summary = pipeline::run(&config, &client, &ThreadSleeper)?;

    if !summary.ran {
        println!("Run not due; use --force to override.");
        return Ok(());
    }
    println!("Processed {} candidate documents", summary.candidates);
    println!("  updated: {}", summary.updated.len());
    println!("  unchanged after transformation: {}", summary.unchanged);
    println!("  skipped (fingerprint match): {}", summary.skipped_unmodified);
    println!("  skipped (empty): {}", summary.skipped_empty);
    println!("  failed: {}", summary.failed.len());
    for path in &summary.updated {
        println!("  - {path}");
    }
    if !summary.failed.is_empty() {
        println!("Failed documents (retried next run):");
        for path in &summary.failed {
            println!("  - {path}");
        }
    }
    Ok(())
}

fn cmd_status(args: StatusArgs) -> Result<()> {
    let state_dir = args
        .state_dir
        .unwrap_or_else(|| args.root.join(".garnish"));
    let ledger = Ledger::load(&state_dir.join(config::LEDGER_FILE));
    let run_state = RunState::load(&state_dir.join(config::RUN_STATE_FILE));

    println!("tracked documents: {}", ledger.records.len());
    println!("failed last attempt: {}", ledger.failed_count());
    match run_state.last_run_epoch_ms {
        0 => println!("last run: never"),
        last_ms => {
            let hours_ago = epoch_ms().saturating_sub(last_ms) / (60 * 60 * 1_000);
            println!("last run: {last_ms} (epoch ms, about {hours_ago}h ago)");
        }
    }
    Ok(())
}
