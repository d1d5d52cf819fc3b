use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

mod admin;
mod catalog;
mod config;
mod db;
mod error;
mod metrics;
mod models;
mod report;
mod session;

use catalog::{CaseCatalog, CaseSource, CatalogSnapshot, NO_CASES_MESSAGE};
use config::{AppConfig, Settings};
use error::SessionError;
use models::{Verdict, VoteOutcome};
use session::Session;

#[derive(Parser)]
#[command(name = "classroom-jury")]
#[command(about = "Classroom jury voting and classification metrics", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,
    /// Username for this invocation
    #[arg(long, env = "JURY_USER", global = true)]
    user: Option<String>,
    /// Admin password, required when the user is `admin`
    #[arg(long, env = "JURY_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// List the cases and your voting progress
    Cases {
        /// Refetch the catalog even if the cache is fresh
        #[arg(long)]
        refresh: bool,
    },
    /// Show one case for voting
    Case {
        /// Position in the catalog, starting at 0
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// Cast or change your verdict on a case
    Vote {
        #[arg(long = "case")]
        case_id: i64,
        #[arg(long, value_enum)]
        verdict: Verdict,
    },
    /// Show published results
    Results {
        #[arg(long, default_value_t = metrics::DEFAULT_THRESHOLD, value_parser = parse_threshold)]
        threshold: f64,
    },
    /// Score the jury against the ground truth
    Score {
        #[arg(long, default_value_t = metrics::DEFAULT_THRESHOLD, value_parser = parse_threshold)]
        threshold: f64,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value_t = metrics::DEFAULT_THRESHOLD, value_parser = parse_threshold)]
        threshold: f64,
        #[arg(long, default_value = "results.md")]
        out: PathBuf,
    },
    /// Show or change runtime settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Export all votes to a CSV file
    Export {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import votes from a CSV export
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Copy the whole database to a new file
    Backup {
        #[arg(long)]
        out: PathBuf,
    },
    /// Delete all votes (run once to get a code, again with --confirm)
    Reset {
        #[arg(long, conflicts_with = "cancel")]
        confirm: Option<String>,
        #[arg(long)]
        cancel: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    /// Allow or forbid students to see results
    SetShowResults {
        #[arg(action = ArgAction::Set)]
        value: bool,
    },
}

fn parse_threshold(value: &str) -> Result<f64, String> {
    let threshold: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err("threshold must be between 0 and 1".to_string())
    }
}

fn login(cli: &Cli) -> anyhow::Result<Session> {
    let username = cli
        .user
        .as_deref()
        .context("--user (or JURY_USER) must be set")?;
    let session = Session::login(
        username,
        cli.password.as_deref(),
        cli.settings.admin_pwd.as_deref(),
    )?;
    info!(user = %session.username, admin = session.is_admin, "session started");
    Ok(session)
}

fn print_catalog_error(snapshot: &CatalogSnapshot) {
    if let Some(error) = &snapshot.error {
        println!("{error}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&cli.settings.database_url)
        .await
        .context("failed to open the vote database")?;
    db::init_db(&pool).await?;

    let source = CaseSource::from_settings(&cli.settings)?;
    let catalog = CaseCatalog::new(pool.clone(), source, cli.settings.cache_ttl());

    match &cli.command {
        Commands::InitDb => {
            println!("Schema ready.");
        }
        Commands::Cases { refresh } => {
            let session = login(&cli)?;
            let snapshot = catalog.load(*refresh).await;
            print_catalog_error(&snapshot);
            if snapshot.cases.is_empty() {
                println!("{NO_CASES_MESSAGE}");
                return Ok(());
            }

            let voted = db::fetch_voted_case_ids(&pool, &session.username).await?;
            let voted_count = snapshot
                .cases
                .iter()
                .filter(|case| voted.contains(&case.id))
                .count();
            println!(
                "Progress: {voted_count}/{} cases judged",
                snapshot.cases.len()
            );
            for (index, case) in snapshot.cases.iter().enumerate() {
                let verdict = db::fetch_verdict(&pool, &session.username, case.id).await?;
                println!(
                    "- [{index}] case #{} ({}): {}",
                    case.id,
                    verdict.map(|v| v.as_str()).unwrap_or("not voted"),
                    case.description
                );
            }
        }
        Commands::Case { index } => {
            let session = login(&cli)?;
            let snapshot = catalog.load(false).await;
            print_catalog_error(&snapshot);
            if snapshot.cases.is_empty() {
                println!("{NO_CASES_MESSAGE}");
                return Ok(());
            }

            let total = snapshot.cases.len();
            let Some(case) = snapshot.cases.get(*index) else {
                bail!("case index {index} is out of range (0..{total})");
            };

            println!("Case #{} ({} of {total})", case.id, index + 1);
            if let Some(image) = case.image.as_deref().filter(|image| !image.is_empty()) {
                println!("Image: {image}");
            }
            println!("Description:\n{}", case.description);

            match db::fetch_verdict(&pool, &session.username, case.id).await? {
                Some(verdict) => println!(
                    "Your current verdict: {}. You can still change it.",
                    verdict.as_str().to_uppercase()
                ),
                None => println!("You have not voted on this case yet."),
            }

            if *index > 0 {
                println!("Previous: --index {}", index - 1);
            }
            if index + 1 < total {
                println!("Next: --index {}", index + 1);
            }

            let voted = db::fetch_voted_case_ids(&pool, &session.username).await?;
            if snapshot.cases.iter().all(|case| voted.contains(&case.id)) {
                println!("Thanks for judging every case! Wait for the instructor to share the results.");
            }
        }
        Commands::Vote { case_id, verdict } => {
            let session = login(&cli)?;
            let snapshot = catalog.load(false).await;
            print_catalog_error(&snapshot);
            if snapshot.find(*case_id).is_none() {
                return Err(SessionError::UnknownCase(*case_id).into());
            }

            let label = verdict.as_str().to_uppercase();
            match db::cast_vote(&pool, &session.username, *case_id, *verdict).await? {
                VoteOutcome::Recorded => println!("Vote recorded: {label}"),
                VoteOutcome::Updated => println!("Vote updated: {label}"),
                VoteOutcome::Unchanged => println!("Your verdict is already {label}."),
            }
        }
        Commands::Results { threshold } => {
            let session = login(&cli)?;
            let app_config = config::load_app_config(&pool).await?;
            session.require_results_visible(&app_config)?;

            let snapshot = catalog.load(false).await;
            let votes = db::fetch_votes(&pool).await?;
            let summary = metrics::compute_metrics(&votes, &snapshot.cases, *threshold);
            print!(
                "{}",
                report::build_student_results(&summary, &snapshot, &votes, &session.username)
            );
        }
        Commands::Score { threshold } => {
            login(&cli)?.require_admin()?;
            let snapshot = catalog.load(false).await;
            print_catalog_error(&snapshot);
            if snapshot.is_unavailable() {
                println!("{NO_CASES_MESSAGE}");
                return Ok(());
            }
            let votes = db::fetch_votes(&pool).await?;
            let summary = metrics::compute_metrics(&votes, &snapshot.cases, *threshold);

            if summary.cases.is_empty() {
                println!("No votes recorded yet.");
                return Ok(());
            }

            println!("Cases at guilty threshold {:.2}:", summary.threshold);
            for aggregate in &summary.cases {
                println!(
                    "- case #{} {} (p={:.2}, {}/{} guilty) truth {} -> {}",
                    aggregate.case_id,
                    aggregate.prediction,
                    aggregate.p_guilty,
                    aggregate.guilty_votes,
                    aggregate.total_votes,
                    aggregate.ground_truth.map(|t| t.as_str()).unwrap_or("unknown"),
                    report::correctness_label(aggregate)
                );
            }

            let scores = &summary.metrics;
            println!(
                "Accuracy {:.2}  Precision {:.2}  Recall {:.2}  F1 {:.2}",
                scores.accuracy, scores.precision, scores.recall, scores.f1
            );
            let matrix = &summary.confusion;
            println!(
                "TP {}  FP {}  FN {}  TN {}",
                matrix.true_positive,
                matrix.false_positive,
                matrix.false_negative,
                matrix.true_negative
            );
        }
        Commands::Report { threshold, out } => {
            login(&cli)?.require_admin()?;
            let snapshot = catalog.load(false).await;
            print_catalog_error(&snapshot);
            if snapshot.is_unavailable() {
                println!("{NO_CASES_MESSAGE} No report written.");
                return Ok(());
            }
            let votes = db::fetch_votes(&pool).await?;
            let summary = metrics::compute_metrics(&votes, &snapshot.cases, *threshold);
            std::fs::write(out, report::build_report(&summary, &snapshot))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Config { action } => {
            login(&cli)?.require_admin()?;
            match action {
                ConfigAction::Show => {
                    let app_config = config::load_app_config(&pool).await?;
                    println!(
                        "show_results_to_students = {}",
                        app_config.show_results_to_students
                    );
                }
                ConfigAction::SetShowResults { value } => {
                    let app_config = AppConfig {
                        show_results_to_students: *value,
                    };
                    config::save_app_config(&pool, &app_config).await?;
                    if *value {
                        println!("Students can now see the results.");
                    } else {
                        println!("Results are no longer visible to students.");
                    }
                }
            }
        }
        Commands::Export { csv } => {
            login(&cli)?.require_admin()?;
            let exported = db::export_csv(&pool, csv).await?;
            println!("Exported {exported} votes to {}.", csv.display());
        }
        Commands::Import { csv } => {
            login(&cli)?.require_admin()?;
            let inserted = db::import_csv(&pool, csv).await?;
            println!("Inserted {inserted} votes from {}.", csv.display());
        }
        Commands::Backup { out } => {
            login(&cli)?.require_admin()?;
            db::backup(&pool, out).await?;
            println!("Database copied to {}.", out.display());
        }
        Commands::Reset { confirm, cancel } => {
            login(&cli)?.require_admin()?;
            if *cancel {
                if admin::cancel_reset(&pool).await? {
                    println!("Reset cancelled.");
                } else {
                    println!("No reset was pending.");
                }
            } else if let Some(code) = confirm {
                let deleted = admin::confirm_reset(&pool, code).await?;
                println!("All votes have been reset ({deleted} deleted).");
            } else {
                let request = admin::request_reset(&pool).await?;
                println!("This will delete ALL votes.");
                println!(
                    "To proceed run `reset --confirm {}` before {}.",
                    request.code,
                    request.expires_at.format("%H:%M:%S UTC")
                );
            }
        }
    }

    Ok(())
}
