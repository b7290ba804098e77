use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use booking_agent::{
    AgentConfig, Command, SessionController,
    core::audio::{WavMicrophoneProvider, WavOutputProvider},
    core::realtime::GeminiLiveConnector,
};

/// Time allowed for the model to finish answering after the input file ends.
const TAIL_DELAY: Duration = Duration::from_secs(5);

/// Booking Agent - voice appointment booking over Gemini Live
#[derive(Parser, Debug)]
#[command(name = "booking-agent")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// WAV file played as the microphone (16 kHz mono)
    #[arg(short = 'i', long = "input", value_name = "WAV")]
    input: PathBuf,

    /// WAV file receiving the agent's speech
    #[arg(short = 'o', long = "output", value_name = "WAV", default_value = "session.wav")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        AgentConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        AgentConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    let connector = Arc::new(GeminiLiveConnector::new(config.gemini.endpoint.clone()));
    let microphone = WavMicrophoneProvider::new(&cli.input);
    let finished = microphone.finished();
    let output = WavOutputProvider::new(&cli.output);

    let controller =
        SessionController::new(config, connector, Arc::new(microphone), Arc::new(output));
    let mut snapshots = controller.subscribe();

    let (tx, rx) = mpsc::channel(16);
    let session = tokio::spawn(controller.run(rx));

    // Print state changes and the confirmed booking as they happen
    let watcher = tokio::spawn(async move {
        let mut last_state = None;
        let mut announced = false;
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            if last_state != Some(snapshot.state) {
                println!("Session {}", snapshot.state);
                last_state = Some(snapshot.state);
            }
            if let Some(error) = &snapshot.last_error {
                println!("Error: {}", error);
            }
            if let (Some(booking), false) = (&snapshot.booking, announced) {
                announced = true;
                match serde_json::to_string_pretty(booking) {
                    Ok(json) => println!("Booking confirmed:\n{}", json),
                    Err(e) => println!("Booking confirmed ({})", e),
                }
            }
        }
    });

    tx.send(Command::Connect)
        .await
        .map_err(|_| anyhow!("Session loop stopped before connecting"))?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, disconnecting");
        }
        _ = finished.cancelled() => {
            info!("Input finished, waiting {:?} for the reply", TAIL_DELAY);
            tokio::time::sleep(TAIL_DELAY).await;
        }
    }

    let _ = tx.send(Command::Disconnect).await;
    drop(tx);
    session
        .await
        .map_err(|e| anyhow!("Session task failed: {}", e))?;
    watcher.abort();

    println!("Agent audio written to {}", cli.output.display());
    Ok(())
}
