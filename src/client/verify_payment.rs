use anyhow::Result;
use clap::{CommandFactory, Parser};
use payment_gate::{
    config::Config,
    models::VerificationResult,
    services::{BatchReport, BatchVerifier},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Verify registration fee payments.
#[derive(Parser, Debug)]
#[command(name = "verify-payment", version)]
struct Cli {
    /// Transaction hash to verify
    #[arg(long)]
    tx: Option<String>,

    /// Agent username (for marking payment as used)
    #[arg(long)]
    agent: Option<String>,

    /// Mark payment as used after verification
    #[arg(long)]
    mark_used: bool,

    /// Override treasury address
    #[arg(long)]
    treasury: Option<String>,

    /// Check all pending registrations
    #[arg(long)]
    pending: bool,

    /// Directory of pending registrations (defaults to PENDING_DIR)
    #[arg(long, requires = "pending")]
    pending_dir: Option<PathBuf>,

    /// Print only the JSON result
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::from_env()?;
    if let Some(treasury) = &cli.treasury {
        config.override_treasury(treasury)?;
    }

    if cli.pending {
        let dir = cli.pending_dir.clone().unwrap_or_else(|| config.pending_dir.clone());
        let verifier = Arc::new(config.build_verifier().await?);
        let batch = BatchVerifier::new(verifier, config.batch_config(cli.mark_used));
        let report = batch.run_dir(&dir).await?;

        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_batch(&report);
        }
        return Ok(if report.has_failures() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let Some(tx) = cli.tx.as_deref() else {
        Cli::command().print_help()?;
        return Ok(ExitCode::FAILURE);
    };

    if !cli.json {
        println!("Verifying payment: {}", tx);
        println!("Treasury: {:?}", config.treasury_address);
        println!();
    }

    let verifier = config.build_verifier().await?;
    let result = verifier.verify(tx, cli.agent.as_deref(), cli.mark_used).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result, &config.token_symbol, cli.agent.as_deref());
        println!();
        println!("Full details:");
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(if result.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_result(result: &VerificationResult, symbol: &str, agent: Option<&str>) {
    let details = &result.details;

    if result.valid {
        println!("VALID");
        println!(
            "  Amount: {} {}",
            details.amount_display.as_deref().unwrap_or("?"),
            symbol
        );
        println!(
            "  From: {}",
            details
                .from
                .map(|a| format!("{:?}", a))
                .unwrap_or_else(|| "?".to_string())
        );
        println!(
            "  Confirmations: {}",
            details
                .confirmations
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        if !details.recipient_checked {
            println!("  WARNING: recipient was not checked");
        }
        if details.marked_used {
            println!("  Marked as used for: {}", agent.unwrap_or("?"));
        }
    } else {
        println!("INVALID");
        if let Some(rejection) = &result.error {
            println!("  Error: {}", rejection.message);
            println!("  Code: {}", rejection.code);
            if rejection.code.is_retryable() {
                println!("  (may succeed if retried later)");
            }
        }
    }
}

fn print_batch(report: &BatchReport) {
    use payment_gate::services::batch::BatchOutcome;

    for entry in &report.entries {
        let status = match &entry.outcome {
            BatchOutcome::Verified { result } if result.valid => "VALID".to_string(),
            BatchOutcome::Verified { result } => format!(
                "INVALID ({})",
                result
                    .error
                    .as_ref()
                    .map(|r| r.message.as_str())
                    .unwrap_or("unknown")
            ),
            BatchOutcome::Failed { error, .. } => format!("ERROR ({})", error),
        };
        println!(
            "{:<24} {}  {}",
            entry.registration.agent, entry.registration.tx_hash, status
        );
    }
    for unreadable in &report.unreadable {
        println!("UNREADABLE {}: {}", unreadable.path.display(), unreadable.error);
    }

    println!();
    println!(
        "{} accepted, {} rejected ({} may pass later), {} failed, {} unreadable",
        report.accepted(),
        report.rejected(),
        report.retry_later(),
        report.failed(),
        report.unreadable.len()
    );
}
