// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quality_check::pipeline::{self, RunRequest, RunSummary};
use quality_check::ReconConfig;
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "quality-check")]
#[command(about = "Reconcile a Complot export against a GIS layer by file link")]
#[command(version)]
struct Cli {
    /// TOML file overriding the built-in field layout
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full check and write the merged table plus report
    Run {
        /// Complot export (CSV)
        #[arg(long)]
        primary: PathBuf,

        /// GIS layer (xlsx)
        #[arg(long)]
        secondary: PathBuf,

        /// Recommendations template (xlsx)
        #[arg(long)]
        template: PathBuf,

        /// Merged table to write (xlsx)
        #[arg(long)]
        output: PathBuf,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive terminal front end
    Tui,
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            primary,
            secondary,
            template,
            output,
            json,
        } => {
            setup_logging(&cli.verbosity, &cli.log_format);
            let request = RunRequest {
                primary,
                secondary,
                template,
                output,
            };
            run_check(&request, &config, json)
        }
        Commands::Tui => run_ui_mode(config),
    };

    if let Err(e) = result {
        eprintln!("\n❌ Quality check failed: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<ReconConfig> {
    match path {
        Some(path) => ReconConfig::from_file(path),
        None => Ok(ReconConfig::default()),
    }
}

/// Logs go to stderr so `--json` output stays parseable
fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn run_check(request: &RunRequest, config: &ReconConfig, json: bool) -> Result<()> {
    if json {
        let summary = pipeline::run(request, config)?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("🔎 Quality Check - Automatic Table Filling");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("\n📁 Inputs:");
    println!("  • {}: {}", config.primary.label, request.primary.display());
    println!("  • {}: {}", config.secondary.label, request.secondary.display());
    println!("  • {}: {}", config.template_label, request.template.display());

    let summary = pipeline::run(request, config)?;
    print_summary(&summary);

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Process completed successfully!");
    println!("\n📊 Results:");
    println!("  • Perfect matches: {}", summary.perfect_matches);
    println!("  • Partial matches: {}", summary.partial_matches);
    println!("  • Total rows: {}", summary.total_rows);
    println!("\n💾 Output files:");
    println!("  1. Filled table: {}", summary.filled_path.display());
    println!("  2. Report: {}", summary.report_path.display());
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: ReconConfig) -> Result<()> {
    let mut app = ui::App::new(config);
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: ReconConfig) -> Result<()> {
    anyhow::bail!("TUI mode not available, rebuild with: cargo build --features tui")
}
