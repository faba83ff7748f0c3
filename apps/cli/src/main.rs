use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use cardiorisk_records::config::Config;
use cardiorisk_records::logging;
use cardiorisk_records::{
    HttpRecordClient, InMemoryRecordStore, PredictionClient, RecordAggregator, RecordAssembler,
    RecordPurger, RecordStore, RiskFactorForm, RiskPredictor,
};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "cardiorisk",
    about = "Cardiovascular risk intake against a FHIR server",
    version,
    arg_required_else_help = true
)]
struct Cli {
    /// Configuration file (defaults to ./cardiorisk.{toml,yaml,json} if present).
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Dry-run `submit` against a throwaway in-process record store. Nothing is
    /// kept between runs, so other commands reject this flag.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a risk-factor payload as a patient record graph, then request a prediction.
    Submit {
        /// Path to the payload JSON file (or "-" for stdin).
        payload: PathBuf,
        /// Pretty-print JSON output.
        #[arg(long, action = ArgAction::SetTrue)]
        pretty: bool,
    },

    /// List patients with their condition flags and latest ten-year risk.
    List {
        /// Pretty-print JSON output.
        #[arg(long, action = ArgAction::SetTrue)]
        pretty: bool,
    },

    /// Delete a patient and every resource that references it.
    Purge {
        patient_id: String,
        #[arg(long, action = ArgAction::SetTrue)]
        pretty: bool,
    },

    /// Request a risk prediction for an existing patient.
    Predict {
        patient_id: String,
        #[arg(long, action = ArgAction::SetTrue)]
        pretty: bool,
    },

    /// Show the FHIR server's capability summary.
    Status,

    /// Print CLI version.
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = match cli.config.as_deref() {
        Some(path) => Config::load_with_file(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _logging_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    if cli.offline {
        if !runs_offline(&cli.command) {
            anyhow::bail!("--offline only applies to submit; the in-memory store starts empty");
        }
        tracing::info!("Using in-memory record store");
        let store = Arc::new(InMemoryRecordStore::new());
        return run(cli.command, &config, store, None).await;
    }

    let client = HttpRecordClient::new(&config.fhir).context("Failed to create FHIR client")?;
    tracing::debug!(fhir_base_url = client.base_url(), "FHIR client ready");

    if let Commands::Status = cli.command {
        let status = client
            .server_status()
            .await
            .context("Failed to reach FHIR server")?;
        return print_json(&status, true);
    }

    let predictor =
        PredictionClient::new(&config.prediction).context("Failed to create prediction client")?;
    run(cli.command, &config, client, Some(&predictor)).await
}

async fn run<S>(
    command: Commands,
    config: &Config,
    store: S,
    predictor: Option<&dyn RiskPredictor>,
) -> Result<()>
where
    S: RecordStore,
{
    match command {
        Commands::Submit { payload, pretty } => {
            let form = read_payload(&payload)?;
            let receipt = RecordAssembler::new(store)
                .with_compensation(config.assembly.compensation)
                .assemble_form(form)
                .await
                .context("Failed to store patient record")?;

            let Some(predictor) = predictor else {
                let offline = json!({ "patient_id": receipt.patient_id, "receipt": receipt });
                return print_json(&offline, pretty);
            };

            match predictor.predict(&receipt.patient_id).await {
                Ok(prediction) => print_json(
                    &json!({ "patient_id": receipt.patient_id, "prediction": prediction }),
                    pretty,
                ),
                Err(e) => {
                    print_json(
                        &json!({
                            "patient_id": receipt.patient_id,
                            "prediction_error": e.to_string(),
                        }),
                        pretty,
                    )?;
                    Err(anyhow::Error::new(e).context(format!(
                        "Patient/{} stored but prediction failed",
                        receipt.patient_id
                    )))
                }
            }
        }
        Commands::List { pretty } => {
            let listings = RecordAggregator::with_config(store, &config.listing)
                .list()
                .await
                .context("Failed to list patients")?;
            print_json(&listings, pretty)
        }
        Commands::Purge { patient_id, pretty } => {
            let report = RecordPurger::new(store)
                .purge(&patient_id)
                .await
                .with_context(|| format!("Failed to purge Patient/{patient_id}"))?;
            print_json(&report, pretty)
        }
        Commands::Predict { patient_id, pretty } => {
            let predictor = predictor
                .context("Predictions need the scoring service; run without --offline")?;
            let prediction = predictor
                .predict(&patient_id)
                .await
                .with_context(|| format!("Failed to predict risk for Patient/{patient_id}"))?;
            print_json(&prediction, pretty)
        }
        Commands::Status => anyhow::bail!("status needs a FHIR server; run without --offline"),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Commands that mean something against an empty, per-process store.
fn runs_offline(command: &Commands) -> bool {
    matches!(command, Commands::Submit { .. } | Commands::Version)
}

fn read_payload(path: &Path) -> Result<RiskFactorForm> {
    let contents = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        buf
    } else {
        fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file '{}'", path.display()))?
    };
    serde_json::from_str(&contents).context("Payload is not a valid risk-factor form")
}

fn print_json<T: Serialize + ?Sized>(value: &T, pretty: bool) -> Result<()> {
    if pretty {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", serde_json::to_string(value)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn offline_is_limited_to_submit() {
        assert!(runs_offline(&command(&[
            "cardiorisk",
            "--offline",
            "submit",
            "form.json"
        ])));
        assert!(!runs_offline(&command(&["cardiorisk", "list", "--offline"])));
        assert!(!runs_offline(&command(&["cardiorisk", "--offline", "purge", "p1"])));
        assert!(!runs_offline(&command(&["cardiorisk", "--offline", "predict", "p1"])));
        assert!(!runs_offline(&command(&["cardiorisk", "--offline", "status"])));
    }
}
