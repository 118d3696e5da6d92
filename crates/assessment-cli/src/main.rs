// ============================================================================
// gifts - Spiritual gifts assessment from the command line
// ============================================================================
// Usage:
//   gifts take --answers FILE [--name N] [--email E]   Score, save and submit
//   gifts show                                         Show the saved result
//   gifts pending                                      List queued deliveries
//   gifts retry                                        Retry queued deliveries now
//   gifts watch                                        Run the retry loop until Ctrl-C
//   gifts whoami | forget                              Show / clear saved identity
//   gifts export                                       Dump the local store as JSON
//   gifts describe [GIFT]                              Describe one or all gifts
//
// `take` retries pending deliveries once before submitting; only `watch`
// keeps the periodic retry loop running.
// ============================================================================

use anyhow::{anyhow, Result};
use assessment_core::catalog;
use assessment_core::{
    parse_answers, AnswerSheet, AssessmentConfig, GiftType, Pipeline, ResultStore, ScoreResult,
    SweepOutcome,
};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

/// Width of the longest chart bar
const CHART_WIDTH: u32 = 40;

/// Highest possible category total (13 questions x 5)
const MAX_CATEGORY_TOTAL: u32 = 65;

/// Spiritual gifts assessment
#[derive(Parser)]
#[command(name = "gifts", version, about = "Take the spiritual gifts assessment and manage results")]
struct Cli {
    /// Path to the database file (default: ~/.gifts/assessment.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score an answers file, save the result and deliver it
    Take {
        /// JSON array of {questionId, giftType, score} entries
        #[arg(long)]
        answers: PathBuf,

        /// Full name to attach to the result
        #[arg(long)]
        name: Option<String>,

        /// Email address to send a copy of the result to
        #[arg(long)]
        email: Option<String>,
    },

    /// Show the saved result with a score chart
    Show,

    /// List deliveries waiting for retry
    Pending,

    /// Retry every waiting delivery once
    Retry,

    /// Keep retrying waiting deliveries until interrupted
    Watch,

    /// Show the saved identity
    Whoami,

    /// Clear the saved name and email (the user id is kept)
    Forget,

    /// Export the local store as JSON
    Export,

    /// Describe a gift, or list all of them
    Describe {
        /// perceiver, server, teacher, exhorter, giver, administrator, compassion
        gift: Option<String>,
    },
}

fn format_timestamp(ts_ms: i64) -> String {
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts_ms))
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("assessment_core=info".parse()?)
                .add_directive("gifts=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AssessmentConfig::default();
    if cli.db_path.is_some() {
        config.db_path = cli.db_path;
    }

    match cli.command {
        Commands::Take {
            answers,
            name,
            email,
        } => cmd_take(&config, &answers, name.as_deref(), email.as_deref()).await,
        Commands::Show => cmd_show(&open_store(&config)?),
        Commands::Pending => cmd_pending(&open_store(&config)?),
        Commands::Retry => cmd_retry(&config).await,
        Commands::Watch => cmd_watch(&config).await,
        Commands::Whoami => cmd_whoami(&open_store(&config)?),
        Commands::Forget => cmd_forget(&open_store(&config)?),
        Commands::Export => cmd_export(&open_store(&config)?),
        Commands::Describe { gift } => cmd_describe(gift.as_deref()),
    }
}

fn open_store(config: &AssessmentConfig) -> Result<ResultStore> {
    ResultStore::open(config.db_path.as_deref())
        .map_err(|e| anyhow!("Failed to open result store: {}", e))
}

fn open_pipeline(config: &AssessmentConfig) -> Result<Pipeline> {
    Pipeline::from_config(config).map_err(|e| anyhow!("Failed to open result store: {}", e))
}

async fn cmd_take(
    config: &AssessmentConfig,
    answers_path: &Path,
    name: Option<&str>,
    email: Option<&str>,
) -> Result<()> {
    let raw = std::fs::read_to_string(answers_path)
        .map_err(|e| anyhow!("Failed to read {}: {}", answers_path.display(), e))?;
    let sheet: AnswerSheet = parse_answers(&raw)
        .map_err(|e| anyhow!("Failed to parse {}: {}", answers_path.display(), e))?
        .into_iter()
        .collect();
    if sheet.is_empty() {
        anyhow::bail!("No valid answers in {}", answers_path.display());
    }

    let pipeline = open_pipeline(config)?;
    let identity = pipeline.orchestrator.identity(name, email);
    let submission = pipeline.submit(&sheet.answers(), &identity).await;

    print_result(&submission.result);
    println!();
    println!("Saved to {}", pipeline.store().location());

    let reports = submission.wait().await;
    if reports.is_empty() {
        println!("No delivery channels configured; result kept locally.");
    }
    for report in &reports {
        let status = if report.outcome.success { "ok" } else { "queued" };
        println!("  {:<6} {:<7} {}", report.channel, status, report.outcome.message);
    }
    Ok(())
}

fn cmd_show(store: &ResultStore) -> Result<()> {
    let Some(result) = store.load_result() else {
        anyhow::bail!("No result found. Take the assessment first: gifts take --answers FILE");
    };

    print_result(&result);

    for (label, gift) in [("Dominant", result.dominant_gift), ("Secondary", result.secondary_gift)] {
        let description = catalog::describe(gift);
        println!();
        println!("{} gift: {} ({})", label, description.name, description.scripture);
        println!("  {}", description.summary);
        println!("  Strengths:  {}", description.strengths_line());
        println!("  Challenges: {}", description.challenges_line());
    }
    Ok(())
}

fn print_result(result: &ScoreResult) {
    println!("=== Spiritual Gifts Result ===");
    if let Some(name) = result.display_name() {
        println!("Name:      {}", name);
    }
    println!("Taken:     {}", format_timestamp(result.timestamp));
    println!("Result ID: {}", result.id);
    println!();

    for gift in GiftType::ALL {
        let total = result.score_for(gift);
        let width = (total.min(MAX_CATEGORY_TOTAL) * CHART_WIDTH / MAX_CATEGORY_TOTAL) as usize;
        let marker = if gift == result.dominant_gift {
            " <- dominant"
        } else if gift == result.secondary_gift {
            " <- secondary"
        } else {
            ""
        };
        println!(
            "  {:<14} {:>3} {}{}",
            catalog::describe(gift).name,
            total,
            "#".repeat(width),
            marker
        );
    }
}

fn cmd_pending(store: &ResultStore) -> Result<()> {
    let pending = store.list_pending();
    if pending.is_empty() {
        println!("No pending deliveries.");
        return Ok(());
    }

    println!(
        "{:<7}  {:<36}  {:<24}  {:<8}  {}",
        "CHANNEL", "RESULT ID", "CREATED", "ATTEMPTS", "LAST ERROR"
    );
    println!("{}", "-".repeat(100));

    for envelope in &pending {
        let error = envelope
            .last_error
            .as_deref()
            .unwrap_or("-")
            .chars()
            .take(40)
            .collect::<String>();
        println!(
            "{:<7}  {:<36}  {:<24}  {:<8}  {}",
            envelope.channel,
            envelope.result.id,
            format_timestamp(envelope.created_at),
            envelope.attempts,
            error
        );
    }

    println!("\nTotal: {} pending", pending.len());
    Ok(())
}

async fn cmd_retry(config: &AssessmentConfig) -> Result<()> {
    let pipeline = open_pipeline(config)?;
    let outcomes = pipeline.retry.sweep().await;
    if outcomes.is_empty() {
        println!("No delivery channels configured.");
    }

    for (channel, outcome) in outcomes {
        let summary = match outcome {
            SweepOutcome::Idle => "nothing pending".to_string(),
            SweepOutcome::Busy => "attempt already in progress".to_string(),
            SweepOutcome::Expired { age_ms, attempts } => format!(
                "dropped: older than 24h ({}h, {} attempts)",
                age_ms / 3_600_000,
                attempts
            ),
            SweepOutcome::Exhausted { attempts } => {
                format!("dropped: gave up after {} attempts", attempts)
            }
            SweepOutcome::Delivered { message } => format!("delivered: {}", message),
            SweepOutcome::AwaitingRetry { attempts, error } => {
                format!("failed (attempt {}): {}", attempts, error)
            }
        };
        println!("  {:<6} {}", channel, summary);
    }
    Ok(())
}

async fn cmd_watch(config: &AssessmentConfig) -> Result<()> {
    let pipeline = open_pipeline(config)?;
    let policy = pipeline.retry.policy();
    println!(
        "Watching pending deliveries (first sweep in {:?}, then every {:?}). Ctrl-C to stop.",
        policy.settle_delay, policy.interval
    );

    pipeline.retry.initialize();
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow!("Failed to listen for Ctrl-C: {}", e))?;
    pipeline.retry.dispose();

    info!("Retry watch stopped");
    Ok(())
}

fn cmd_whoami(store: &ResultStore) -> Result<()> {
    let info = store.load_user_info();
    println!("User ID: {}", store.user_id());
    println!(
        "Name:    {}",
        info.as_ref().and_then(|i| i.full_name.as_deref()).unwrap_or("-")
    );
    println!(
        "Email:   {}",
        info.as_ref().and_then(|i| i.email.as_deref()).unwrap_or("-")
    );
    Ok(())
}

fn cmd_forget(store: &ResultStore) -> Result<()> {
    store.clear_user_info();
    println!("Cleared saved name and email (user ID {} kept).", store.user_id());
    Ok(())
}

fn cmd_export(store: &ResultStore) -> Result<()> {
    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "store": store.export(),
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

fn cmd_describe(gift: Option<&str>) -> Result<()> {
    let Some(raw) = gift else {
        for description in catalog::all() {
            println!("{:<14} {}", description.name, description.summary);
        }
        return Ok(());
    };

    let gift = GiftType::from_str(raw).ok_or_else(|| {
        anyhow!(
            "Unknown gift '{}'. Valid values: perceiver, server, teacher, exhorter, giver, administrator, compassion",
            raw
        )
    })?;
    let description = catalog::describe(gift);

    println!("=== {} ===", description.name);
    println!("{}", description.summary);
    println!("Scripture: {}", description.scripture);
    println!();
    println!("Strengths:");
    for strength in description.strengths {
        println!("  - {}", strength);
    }
    println!("Challenges:");
    for challenge in description.challenges {
        println!("  - {}", challenge);
    }
    Ok(())
}
