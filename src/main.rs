use anyhow::Context;
use clap::{Parser, Subcommand};
use image_decrypt_tool::decrypt::TripleDesCbc;
use image_decrypt_tool::types::{PlanReport, RunReport};
use image_decrypt_tool::{app, config, hw, logging};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bulk-decrypt encrypted image trees, resumable")]
struct Cli {
    /// JSON or YAML config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(long)]
    input_dir: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// decrypt threads (default: half the logical cores)
    #[arg(long)]
    cpu_num: Option<usize>,

    /// max files in flight (default: cpu_num + 1)
    #[arg(long)]
    coroutine: Option<usize>,

    /// ledger entries buffered before a write
    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(short, long)]
    verbose: bool,

    /// print the final report as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Decrypt pending files (default)
    Run,
    /// List pending files without decrypting anything
    Plan,
}

impl Cli {
    fn overrides(&self) -> config::Overrides {
        config::Overrides {
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            cache_file: self.cache_file.clone(),
            cpu_num: self.cpu_num,
            coroutine: self.coroutine,
            batch_size: self.batch_size,
        }
    }
}

fn print_run_report(r: &RunReport) {
    println!("=== DECRYPT REPORT ===");
    println!("Started    : {}", r.started_at);
    println!("Elapsed    : {:.2}s", r.elapsed_secs);
    println!("Discovered : {}", r.discovered);
    println!("Skipped    : {}", r.skipped);
    println!("Decrypted  : {}", r.decrypted);
    println!("Failed     : {}", r.failed);
    println!("Walk errors: {}", r.walk_errors);
    println!("Ledger     : {} written, {} lost", r.ledger_written, r.ledger_lost);
}

fn print_plan(p: &PlanReport) {
    println!("=== RUN PLAN ===");
    println!("Already processed: {}", p.already_processed);
    println!("Walk errors      : {}", p.walk_errors);
    println!("Pending          : {}", p.pending.len());
    for f in &p.pending {
        println!("  - {}", f.display());
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut file_cfg = config::load_config(&cli.config)?;
    file_cfg.apply(&cli.overrides());

    let info_log = file_cfg.info_log();
    let error_log = file_cfg.error_log();
    logging::init(&logging::LogOptions {
        info_log: info_log.as_deref(),
        error_log: error_log.as_deref(),
        verbose: cli.verbose,
        json: cli.json,
    })?;
    info!(config = %cli.config.display(), "config loaded");

    let hwinfo = hw::detect_hw();
    info!(
        logical = hwinfo.logical_cpus,
        physical = hwinfo.physical_cpus,
        "hw detected"
    );

    let cfg = config::resolve(&file_cfg, &hwinfo)?;
    info!(
        cpu_num = cfg.tune.cpu_num,
        coroutine = cfg.tune.coroutine,
        "tuning resolved"
    );

    match cli.cmd.unwrap_or(Commands::Run) {
        Commands::Run => {
            let decryptor = TripleDesCbc::new(
                file_cfg.key.as_bytes(),
                file_cfg.iv.as_bytes(),
                file_cfg.encoding,
            )
            .context("invalid key/iv in config")?;

            let report = app::run(&cfg, &decryptor)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_run_report(&report);
            }
        }
        Commands::Plan => {
            let plan = app::plan(&cfg)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
        }
    }

    Ok(())
}
