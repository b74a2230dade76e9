// vouch CLI - batch purchase-obligation reconciliation, headless

mod loader;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use vouch_recon::config::ReconConfig;
use vouch_recon::error::ReconError;
use vouch_recon::model::ReconInput;
use vouch_recon::ReportStatus;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILED_REPORT: u8 = 1;
pub const EXIT_USAGE: u8 = 2;
pub const EXIT_IO: u8 = 3;

#[derive(Parser)]
#[command(name = "vouch")]
#[command(about = "Reconcile purchase obligations against invoice evidence and the ledger")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation batch over five CSV inputs
    #[command(after_help = "\
Examples:
  vouch run --line-items items.csv --catalog catalog.csv \\
            --evidence invoices.csv --evidence-dates approvals.csv \\
            --ledger ledger.csv --out report.json
  vouch run ... --config vouch.toml --as-of 2024-06-30")]
    Run {
        /// Purchase line items CSV
        #[arg(long)]
        line_items: PathBuf,

        /// Reference catalog CSV of eligible (partner, reference) pairs
        #[arg(long)]
        catalog: PathBuf,

        /// Primary evidence CSV (invoice rows)
        #[arg(long)]
        evidence: PathBuf,

        /// Secondary evidence CSV (authoritative dates by approval id)
        #[arg(long)]
        evidence_dates: PathBuf,

        /// Accounting ledger CSV
        #[arg(long)]
        ledger: PathBuf,

        /// Engine config TOML (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the full result as JSON
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,

        /// Anchor date for future-dated-evidence checks (YYYY-MM-DD, default today)
        #[arg(long)]
        as_of: Option<String>,
    },

    /// Validate an engine config TOML without running
    CheckConfig {
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            line_items,
            catalog,
            evidence,
            evidence_dates,
            ledger,
            config,
            out,
            as_of,
        } => cmd_run(
            &line_items,
            &catalog,
            &evidence,
            &evidence_dates,
            &ledger,
            config.as_deref(),
            out.as_deref(),
            as_of.as_deref(),
        ),
        Commands::CheckConfig { config } => cmd_check_config(&config),
    }
}

fn read_file(path: &Path) -> Result<String, ReconError> {
    fs::read_to_string(path)
        .map_err(|e| ReconError::Io(format!("{}: {e}", path.display())))
}

fn load_config(path: Option<&Path>) -> Result<ReconConfig, ReconError> {
    match path {
        Some(p) => ReconConfig::from_toml(&read_file(p)?),
        None => Ok(ReconConfig::default()),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    line_items: &Path,
    catalog: &Path,
    evidence: &Path,
    evidence_dates: &Path,
    ledger: &Path,
    config: Option<&Path>,
    out: Option<&Path>,
    as_of: Option<&str>,
) -> ExitCode {
    let as_of = match as_of {
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                eprintln!("error: cannot parse --as-of '{raw}' (expected YYYY-MM-DD)");
                return ExitCode::from(EXIT_USAGE);
            }
        },
        None => chrono::Utc::now().date_naive(),
    };

    let result = (|| -> Result<_, ReconError> {
        let config = load_config(config)?;
        let input = ReconInput {
            line_items: loader::load_line_items(&read_file(line_items)?)?,
            catalog: loader::load_catalog(&read_file(catalog)?)?,
            primary_evidence: loader::load_primary_evidence(&read_file(evidence)?)?,
            secondary_evidence: loader::load_secondary_evidence(&read_file(evidence_dates)?)?,
            ledger: loader::load_ledger(&read_file(ledger)?)?,
        };
        vouch_recon::engine::run(&config, &input, as_of)
    })();

    let result = match result {
        Ok(r) => r,
        Err(e @ ReconError::Io(_)) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_IO);
        }
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_FAILED_REPORT);
        }
    };

    print_summary(&result);

    if let Some(path) = out {
        let json = serde_json::to_string_pretty(&result).expect("result serializes");
        if let Err(e) = fs::write(path, json) {
            eprintln!("error: cannot write {}: {e}", path.display());
            return ExitCode::from(EXIT_IO);
        }
        println!("report written to {}", path.display());
    }

    match result.report.status {
        ReportStatus::Failed => ExitCode::from(EXIT_FAILED_REPORT),
        ReportStatus::Success | ReportStatus::Warning => ExitCode::from(EXIT_SUCCESS),
    }
}

fn print_summary(result: &vouch_recon::ReconResult) {
    let report = &result.report;
    let stats = &report.statistics;

    println!("status: {}", report.status);
    println!(
        "obligations: {} total, {} matched ({:.2}%)",
        stats.total_obligations, stats.matched_obligations, stats.match_rate_percent
    );
    for (tier, count) in &stats.tier_counts {
        println!("  {tier}: {count}");
    }
    println!(
        "ledger: {} confirmed, {} unconfirmed, {} split payment(s)",
        stats.ledger_confirmed_evidence,
        stats.ledger_unconfirmed_evidence,
        stats.split_payments
    );
    if stats.unresolved_evidence > 0 {
        println!("unresolved evidence: {}", stats.unresolved_evidence);
    }

    for error in &report.errors {
        println!("error: {error}");
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for info in &report.info {
        println!("info: {info}");
    }
}

fn cmd_check_config(path: &Path) -> ExitCode {
    let raw = match read_file(path) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_IO);
        }
    };
    match ReconConfig::from_toml(&raw) {
        Ok(config) => {
            println!("config '{}' is valid", config.name);
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}
