use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use edu_audit::audit::export::{save_export, ExportConfig, LedgerExporter};
use edu_audit::audit::{AnomalyConfig, AnomalyDetector, ChainStatus, ChainVerifier, RiskLevel};
use edu_audit::database::Database;

/// Verify edu-audit ledger integrity
#[derive(Parser, Debug)]
#[command(name = "verify-audit-log", version)]
struct Args {
    /// Ledger database URL
    #[arg(short, long, env = "EDU_AUDIT__DATABASE_URL")]
    database_url: String,

    /// First block index to verify
    #[arg(long, default_value_t = 0)]
    from: u64,

    /// Last block index to verify (defaults to the tip)
    #[arg(long)]
    to: Option<u64>,

    /// Blocks fetched per verification page
    #[arg(long, default_value_t = 500)]
    page_size: u32,

    /// Recent blocks to include in the anomaly scan
    #[arg(short, long, default_value_t = 100)]
    window: u32,

    /// Write a full export (JSON, or YAML for .yml/.yaml) to this path
    #[arg(short, long, value_name = "PATH")]
    export: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.quiet {
        tracing::Level::ERROR
    } else if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(e) = run(&args).await {
        error!("Audit ledger verification failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(args: &Args) -> Result<()> {
    info!("Verifying audit ledger: {}", args.database_url);

    let database = Database::open_read_only(&args.database_url).await?;
    let verifier = ChainVerifier::new(database.clone()).with_page_size(args.page_size);

    let report = verifier.verify_range(args.from, args.to).await?;
    if !args.quiet {
        println!("{}", report.summary());
    }
    if args.verbose {
        if let Some(reason) = &report.reason {
            println!("  Reason: {:?}", reason);
        }
        println!(
            "  Checked {} blocks in {}ms",
            report.blocks_checked,
            (report.finished_at - report.started_at).num_milliseconds()
        );
    }

    let detector = AnomalyDetector::new(database.clone(), AnomalyConfig::default());
    let anomalies = detector.scan(args.window).await?;
    if args.verbose {
        println!("\nAnomaly scan ({} most recent blocks):", anomalies.blocks_scanned);
        println!("  Recent modifications: {}", anomalies.recent_modifications);
        println!("  Duplicate timestamps: {}", anomalies.duplicate_timestamps);
        println!("  Destructive actions:  {}", anomalies.unusual_actions.len());
        for actor in &anomalies.suspicious_actors {
            println!("    actor: {}", actor);
        }
    }
    if anomalies.risk_level == RiskLevel::High && !args.quiet {
        println!("⚠ Anomaly risk level HIGH");
    }

    if let Some(path) = &args.export {
        let exporter = LedgerExporter::new(
            database.clone(),
            verifier.clone(),
            detector.clone(),
            ExportConfig::default(),
        );
        let export = exporter.export().await?;
        save_export(&export, path).await?;
        if !args.quiet {
            println!("Export written to {}", path.display());
        }
    }

    database.close().await;

    match report.status {
        ChainStatus::Verified => Ok(()),
        ChainStatus::Tampered { at } => Err(anyhow!("hash chain diverges at block {}", at)),
    }
}
