use anyhow::Result;
use clap::{Parser, Subcommand};
use probe::ffprobe::{FfprobeConfig, FfprobeProber};
use probe::MediaProber;
use sift_cli::fs_apply::StdFileSystem;
use sift_cli::logging;
use sift_core::config::{self, AppConfig};
use sift_core::pipeline::{self, RunOptions};
use sift_core::report;
use sift_core::SiftError;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

const EXIT_CONFIG: u8 = 2;
const EXIT_ENVIRONMENT: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logger(cli.verbose);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<SiftError>() {
        Some(SiftError::Config(_)) => EXIT_CONFIG,
        _ => EXIT_ENVIRONMENT,
    }
}

#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "Probe, classify and file incoming media into quality tiers", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the incoming tree and file everything into the intake tree
    Run {
        /// Plan and report without touching any file
        #[arg(long)]
        dry_run: bool,
        /// Ignore cached probe results
        #[arg(long)]
        rescan: bool,
        /// Write the transfer report (JSON) to this path
        #[arg(long)]
        report: Option<PathBuf>,
        /// Process at most N files
        #[arg(long)]
        limit: Option<usize>,
        /// Only consider files with this extension (repeatable)
        #[arg(long = "only-ext")]
        only_ext: Vec<String>,
        /// Print the full report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Probe one file and show its attributes, tier and canonical name
    Inspect {
        file: PathBuf,
        #[arg(long)]
        rescan: bool,
    },
    /// List the intake folders a run may create
    Folders {
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration, including the tier table
    Config,
}

async fn dispatch(cli: Cli) -> Result<()> {
    let cfg = config::load(cli.config.as_deref())?.resolve_paths()?;

    match cli.command {
        Commands::Run {
            dry_run,
            rescan,
            report,
            limit,
            only_ext,
            json,
        } => {
            let opts = RunOptions {
                dry_run,
                rescan,
                limit,
                only_ext,
            };
            run_intake(&cfg, opts, report, json).await
        }
        Commands::Inspect { file, rescan } => {
            let file = if file.is_absolute() {
                file
            } else {
                std::env::current_dir()?.join(file)
            };
            let inspection = pipeline::inspect(&cfg, &file, rescan, prober_for(&cfg)).await?;
            println!("{}", serde_json::to_string_pretty(&inspection)?);
            Ok(())
        }
        Commands::Folders { json } => {
            let folders = pipeline::folders(&cfg)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&folders)?);
            } else {
                for dir in folders {
                    println!("{}", dir.display());
                }
            }
            Ok(())
        }
        Commands::Config => {
            let table = cfg.rule_table()?;
            let effective = serde_json::json!({
                "config": cfg,
                "tiers": table.rules(),
            });
            println!("{}", serde_json::to_string_pretty(&effective)?);
            Ok(())
        }
    }
}

fn prober_for(cfg: &AppConfig) -> Arc<dyn MediaProber> {
    Arc::new(FfprobeProber::new(FfprobeConfig {
        bin: cfg.probe.bin.clone(),
        args: cfg.probe.args.clone(),
        timeout: cfg.probe.timeout(),
    }))
}

async fn run_intake(
    cfg: &AppConfig,
    opts: RunOptions,
    report_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let dry_run = opts.dry_run || cfg.io.dry_run;
    let out = pipeline::run(cfg, &opts, prober_for(cfg), &StdFileSystem).await?;

    if let Some(path) = &report_path {
        report::write_report(&out.report, path)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&out.report)?);
    } else {
        let s = &out.report.summary;
        let tiers: Vec<String> = s.tiers.iter().map(|(t, n)| format!("{t}={n}")).collect();
        println!(
            "{}: total {}, executed {}, skipped {}, failed {} [{}]",
            if dry_run { "dry-run" } else { "run" },
            s.total,
            s.executed,
            s.skipped,
            s.failed,
            tiers.join(" ")
        );
        println!(
            "probe cache: {} hits, {} misses, {} corrupt",
            out.cache.hits, out.cache.misses, out.cache.corrupt
        );
        if let Some(path) = report_path {
            println!("report: {}", path.display());
        }
    }
    Ok(())
}
