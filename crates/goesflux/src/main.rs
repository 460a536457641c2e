mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use goesflux_core::config::AppConfig;
use goesflux_core::dispatcher::Dispatcher;
use goesflux_core::invocation::{Invocation, InvocationResponse, Payload};
use goesflux_core::processor::FluxSeriesProcessor;
use goesflux_core::secrets::{EnvCredentialProvider, SecretsManagerProvider};
use goesflux_core::tasks::{all_tasks, TaskContext};
use goesflux_core::upstream::{rows_to_series, SwpcFluxRow};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "GOES X-ray flux scheduled task runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single task by name
    Invoke(InvokeArgs),
    /// Dispatch a scheduled-rule event read from a JSON file
    HandleEvent(HandleEventArgs),
    /// Accept invocations over HTTP
    Serve(ServeArgs),
    /// List registered tasks
    Tasks,
    /// Detect flares in a saved SWPC feed without writing anywhere
    Detect(DetectArgs),
}

#[derive(Args, Debug)]
struct InvokeArgs {
    /// Task name, e.g. import_goes_xrs_timeseries
    name: String,
    /// JSON object passed to the task
    #[arg(long)]
    payload: Option<String>,
}

#[derive(Args, Debug)]
struct HandleEventArgs {
    path: PathBuf,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:3000")]
    bind: SocketAddr,
}

#[derive(Args, Debug)]
struct DetectArgs {
    /// Path to an xrays-N-day.json document
    #[arg(long)]
    file: PathBuf,
    /// End of the lookback window (defaults to the newest sample in the file)
    #[arg(long)]
    now: Option<DateTime<Utc>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Invoke(args) => {
            let payload: Payload = match args.payload.as_deref() {
                Some(raw) => serde_json::from_str(raw).context("--payload must be a JSON object")?,
                None => Payload::new(),
            };
            let dispatcher = build_dispatcher(&AppConfig::load()?).await?;
            let response = dispatcher
                .execute(&Invocation::new(args.name, payload))
                .await
                .into_response();
            finish(response)
        }
        Command::HandleEvent(args) => {
            let raw = tokio::fs::read_to_string(&args.path)
                .await
                .with_context(|| format!("failed to read {}", args.path.display()))?;
            let event: serde_json::Value =
                serde_json::from_str(&raw).context("event file is not valid JSON")?;

            let response = match Invocation::from_scheduled_event(&event) {
                Ok(invocation) => {
                    let dispatcher = build_dispatcher(&AppConfig::load()?).await?;
                    dispatcher.execute(&invocation).await.into_response()
                }
                Err(err) => {
                    warn!(error = %err, "could not build invocation from event");
                    InvocationResponse::from_error(&err)
                }
            };
            finish(response)
        }
        Command::Serve(args) => {
            let dispatcher = build_dispatcher(&AppConfig::load()?).await?;
            let router = server::router(Arc::new(dispatcher));

            let listener = TcpListener::bind(args.bind).await?;
            info!("listening on {}", listener.local_addr()?);
            axum::serve(listener, router.into_make_service()).await?;
            Ok(())
        }
        Command::Tasks => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["task", "description"]);
            for task in all_tasks() {
                table.add_row(vec![task.code_identifier(), task.description()]);
            }
            println!("{table}");
            Ok(())
        }
        Command::Detect(args) => detect(&AppConfig::load()?, args).await,
    }
}

async fn build_dispatcher(config: &AppConfig) -> Result<Dispatcher> {
    let context = if config.secrets.secret_reference.is_some() {
        let credentials = SecretsManagerProvider::from_env().await;
        TaskContext::from_config(config, &credentials).await?
    } else {
        TaskContext::from_config(config, &EnvCredentialProvider).await?
    };
    Ok(Dispatcher::standard(Arc::new(context))?)
}

fn finish(response: InvocationResponse) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&response)?);
    if response.status_code != 200 {
        std::process::exit(1);
    }
    Ok(())
}

async fn detect(config: &AppConfig, args: DetectArgs) -> Result<()> {
    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let rows: Vec<SwpcFluxRow> =
        serde_json::from_str(&raw).context("feed file is not an array of flux rows")?;
    let series = rows_to_series(rows)?;

    let now = match args.now {
        Some(now) => now,
        None => series
            .samples
            .iter()
            .map(|sample| sample.timestamp)
            .max()
            .context("feed file contains no samples")?,
    };

    let processor = FluxSeriesProcessor::from_settings(&config.detection)?;
    let flares = processor.detect(&series, now)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["channel", "start", "peak", "end", "peak flux", "class"]);
    for flare in &flares {
        table.add_row(vec![
            flare.channel.to_string(),
            flare.start_ts.to_rfc3339(),
            flare.peak_ts.to_rfc3339(),
            flare.end_ts.to_rfc3339(),
            format!("{:.2e}", flare.peak_flux),
            flare.classification_tag.clone(),
        ]);
    }
    println!("{table}");
    info!(flares = flares.len(), %now, "offline detection finished");
    Ok(())
}
