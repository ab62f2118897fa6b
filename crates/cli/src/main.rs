use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use events::{Event, EventBus, EventEnvelope};
use machined_core::{MachineConfig, PlatformMode, Sequence, SequenceRequest};
use sequencer::{Controller, DryRunPlatform, Executor, MachineState, Runtime, SequencerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CONFIG_FILE: &str = "machined.toml";

#[derive(Parser)]
#[command(name = "machined")]
#[command(about = "Plan and dry-run machine lifecycle sequences", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// List every lifecycle sequence
    Sequences,
    /// Print the phases a sequence would run
    Plan {
        sequence: String,

        /// JSON request payload for applyConfiguration, upgrade, reset or recover
        #[arg(short, long)]
        request: Option<PathBuf>,
    },
    /// Run a sequence against the dry-run platform
    Run {
        sequence: String,

        #[arg(short, long)]
        request: Option<PathBuf>,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct MachinedConfig {
    runtime: RuntimeConfig,
    sequencer: SequencerConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct RuntimeConfig {
    mode: PlatformMode,
    installed: bool,
    /// JSON machine configuration served by the platform's `load_config`.
    machine_config: Option<PathBuf>,
    /// Start with the machine configuration already loaded, as after a boot.
    preload: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: PlatformMode::default(),
            installed: false,
            machine_config: None,
            preload: true,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Sequences => {
            list_sequences();
            Ok(())
        }
        Commands::Plan { sequence, request } => {
            let config = load_config(&cli.config).await?;
            plan(&config, &sequence, request.as_deref()).await
        }
        Commands::Run { sequence, request } => {
            let config = load_config(&cli.config).await?;
            run(&config, &sequence, request.as_deref()).await
        }
    }
}

fn list_sequences() {
    for sequence in Sequence::ALL {
        let request = if sequence.takes_request() {
            "takes a request"
        } else {
            ""
        };
        println!("  {:<20} {}", sequence.as_str(), request.dimmed());
    }
}

async fn plan(config: &MachinedConfig, sequence: &str, request: Option<&Path>) -> Result<()> {
    let sequence = Sequence::parse(sequence)?;
    let request = read_request(sequence, request).await?;
    let controller = build_controller(config).await?;

    let phases = controller.plan(sequence, &request)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&Executor::plan_summary(&phases))?
    );

    Ok(())
}

async fn run(config: &MachinedConfig, sequence: &str, request: Option<&Path>) -> Result<()> {
    let sequence = Sequence::parse(sequence)?;
    let request = read_request(sequence, request).await?;
    let controller = build_controller(config).await?;

    let printer = spawn_event_printer(controller.runtime().events().bus());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling sequence");
            on_interrupt.cancel();
        }
    });

    let outcome = controller.run(sequence, request, cancel).await;

    // Closing the bus lets the printer drain and exit.
    drop(controller);
    printer.await?;

    outcome.with_context(|| format!("sequence {sequence} failed"))?;
    println!();
    println!("Sequence {} completed", sequence.to_string().bold());

    Ok(())
}

async fn load_config(path: &Path) -> Result<MachinedConfig> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(MachinedConfig::default());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}

async fn load_machine_config(path: &Path) -> Result<MachineConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read machine config {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid machine config {}", path.display()))
}

async fn read_request(sequence: Sequence, path: Option<&Path>) -> Result<SequenceRequest> {
    let Some(path) = path else {
        return Ok(SequenceRequest::None);
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read request {}", path.display()))?;
    parse_request(sequence, &content)
}

/// Decode the payload `sequence` expects.
fn parse_request(sequence: Sequence, content: &str) -> Result<SequenceRequest> {
    let request = match sequence {
        Sequence::ApplyConfiguration => {
            SequenceRequest::ApplyConfiguration(serde_json::from_str(content)?)
        }
        Sequence::Upgrade => SequenceRequest::Upgrade(serde_json::from_str(content)?),
        Sequence::Reset => SequenceRequest::Reset(serde_json::from_str(content)?),
        Sequence::Recover => SequenceRequest::Recover(serde_json::from_str(content)?),
        other => bail!("sequence {other} does not take a request"),
    };
    Ok(request)
}

async fn build_controller(config: &MachinedConfig) -> Result<Controller> {
    let mut platform = DryRunPlatform::new();
    let mut state = MachineState::new(config.runtime.mode).installed(config.runtime.installed);

    if let Some(path) = &config.runtime.machine_config {
        let machine_config = load_machine_config(path).await?;
        tracing::info!(
            path = %path.display(),
            machine_type = machine_config.machine_type.as_str(),
            "Machine config loaded"
        );
        if config.runtime.preload {
            state = state.with_config(machine_config.clone());
        }
        platform = platform.with_config(machine_config);
    }

    let runtime = Runtime::with_settings(state, Arc::new(platform), config.sequencer.clone());
    Ok(Controller::with_machine_sequencer(Arc::new(runtime)))
}

fn spawn_event_printer(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    let line = format_event(&envelope);
                    if envelope.event.is_fatal() {
                        println!("{}", line.red());
                    } else {
                        println!("{}", line.green());
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn format_event(envelope: &EventEnvelope) -> String {
    let timestamp = envelope.timestamp.format("%H:%M:%S%.3f");
    match &envelope.event {
        Event::SequenceStart { sequence } => {
            format!("#{} {timestamp} sequence {sequence} started", envelope.ordinal)
        }
        Event::FatalSequencerError { sequence, error } => {
            format!(
                "#{} {timestamp} sequence {sequence} failed: {error}",
                envelope.ordinal
            )
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "machined=info,sequencer=info".into()),
        )
        .init();
}
