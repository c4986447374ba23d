use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pdr_core::config::{
    deletion_policy_from_env_value, patient_data_dir_from_env_value, retry_attempts_from_env_value,
};
use pdr_core::constants::{
    DEFAULT_MERGE_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS,
};
use pdr_core::{
    CoreConfig, FileStore, Patient, PatientError, PatientRepository, PatientResult, RetryPolicy,
};

const PATIENT_DATA_DIR_ENV: &str = "PATIENT_DATA_DIR";
const STORE_RETRIES_ENV: &str = "PDR_STORE_RETRIES";
const DELETION_POLICY_ENV: &str = "PDR_DELETION_POLICY";

#[derive(Parser)]
#[command(name = "pdr")]
#[command(about = "Patient document repository CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a patient
    Create {
        /// Given name
        given_name: String,
        /// Family name (optional)
        #[arg(long)]
        family: Option<String>,
        /// Date of birth (YYYY-MM-DD)
        #[arg(long)]
        birth_date: Option<NaiveDate>,
    },
    /// Show a patient with its notes
    Show {
        /// Patient id
        id: String,
    },
    /// List all patients
    List,
    /// Append a clinical note to a patient
    AddNote {
        /// Patient id
        id: String,
        /// Note text
        text: String,
        /// Who recorded the note (optional)
        #[arg(long)]
        author: Option<String>,
    },
    /// Delete a patient
    Delete {
        /// Patient id
        id: String,
    },
}

/// Entry point for the PDR command line.
///
/// Results are printed to stdout as JSON. A failed repository call prints its structured
/// failure (`{"kind": ...}`) to stderr and exits with status 1.
///
/// # Environment Variables
/// - `PATIENT_DATA_DIR`: Directory for patient data storage (default: "patient_data")
/// - `PDR_STORE_RETRIES`: Attempts per store round-trip on transient failure (default: 3)
/// - `PDR_DELETION_POLICY`: `soft` (default) or `hard`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pdr_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = Arc::new(config_from_env()?);
    tracing::debug!("patient data dir: {}", cfg.patient_data_dir().display());
    let repo = PatientRepository::open(cfg);

    match run(&repo, cli.command).await {
        Ok(output) => println!("{}", serde_json::to_string_pretty(&output)?),
        Err(err) => {
            tracing::debug!("command failed: {}", err);
            eprintln!("{}", serde_json::to_string_pretty(&err.failure())?);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn config_from_env() -> anyhow::Result<CoreConfig> {
    let data_dir = patient_data_dir_from_env_value(std::env::var(PATIENT_DATA_DIR_ENV).ok());
    let attempts = retry_attempts_from_env_value(std::env::var(STORE_RETRIES_ENV).ok())?;
    let deletion_policy = deletion_policy_from_env_value(std::env::var(DELETION_POLICY_ENV).ok())?;

    let retry = RetryPolicy::new(
        attempts,
        Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
        Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
    )?;

    Ok(CoreConfig::new(
        data_dir,
        retry,
        DEFAULT_MERGE_ATTEMPTS,
        deletion_policy,
    )?)
}

async fn run(repo: &PatientRepository<FileStore>, command: Commands) -> PatientResult<Value> {
    match command {
        Commands::Create {
            given_name,
            family,
            birth_date,
        } => {
            let mut patient = Patient::new(given_name);
            patient.family_name = family;
            patient.birth_date = birth_date;
            to_json(&repo.save_or_update(patient).await?)
        }
        Commands::Show { id } => to_json(&repo.find(&id).await?),
        Commands::List => to_json(&repo.find_all().await?),
        Commands::AddNote { id, text, author } => {
            let patient = repo.find(&id).await?;
            let mut note = patient.draft_note(text);
            note.author = author;
            to_json(&repo.add_note(&id, note).await?)
        }
        Commands::Delete { id } => {
            repo.delete(&id).await?;
            Ok(json!({ "deleted": id }))
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> PatientResult<Value> {
    serde_json::to_value(value).map_err(PatientError::Serialization)
}
