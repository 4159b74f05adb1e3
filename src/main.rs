use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use murmur::config::Config;
use murmur::notify::LogNotifier;
use murmur::recorder::{RecorderFactory, RecorderMethod};
use murmur::security::RecordingToolPolicy;
use murmur::service::{AudioService, IOService, ServiceState};
use murmur::storage::{TempFileConfig, TempFileManager};
use murmur::transcribe::{CliTranscriber, FileModelManager};

#[derive(Parser)]
#[command(name = "murmur", about = "Push-to-talk dictation capture service")]
struct Cli {
    /// Configuration file base name (e.g. "config/murmur").
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the interactive capture loop.
    Run,
    /// Print a pre-flight diagnostics report as JSON.
    Doctor,
    /// Test one recorder backend with a short capture.
    Probe { backend: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let shared = config.into_shared();

    let policy = Arc::new(RecordingToolPolicy);
    let temp = TempFileManager::new(TempFileConfig::from(&shared.read().await.storage));
    let factory = Arc::new(RecorderFactory::new(
        Arc::clone(&shared),
        policy.clone(),
        Arc::clone(&temp),
    ));

    match cli.command.unwrap_or(Command::Run) {
        Command::Doctor => {
            let report = factory.diagnostics().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Probe { backend } => {
            let method = RecorderMethod::parse(&backend)?;
            match factory.test_recorder_method(method).await {
                Ok(()) => println!("{method}: ok"),
                Err(e) => {
                    println!("{method}: failed ({e})");
                    std::process::exit(1);
                }
            }
        }
        Command::Run => {
            run(shared, policy, temp, factory).await?;
        }
    }

    Ok(())
}

async fn run(
    shared: murmur::config::SharedConfig,
    policy: Arc<RecordingToolPolicy>,
    temp: Arc<TempFileManager>,
    factory: Arc<RecorderFactory>,
) -> Result<()> {
    temp.start_sweeper();

    let notifier = Arc::new(LogNotifier);
    let io = Arc::new(IOService::new(Arc::clone(&shared), notifier.clone()));

    let (engine, model_path) = {
        let cfg = shared.read().await;
        (
            cfg.transcription.engine.clone(),
            cfg.transcription.model_path.clone(),
        )
    };
    let model = Arc::new(FileModelManager::new(model_path));
    let transcriber = Arc::new(CliTranscriber::new(engine, model.clone(), policy));

    let service = AudioService::new(
        shared,
        factory,
        transcriber,
        model,
        io,
        notifier,
        Arc::clone(&temp),
    );

    info!("murmur ready: press Enter to toggle recording, 'q' to quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "q" | "quit" => break,
            "" => match service.current_state().await {
                ServiceState::Idle => {
                    if let Err(e) = service.start_recording().await {
                        warn!("could not start: {e}");
                    }
                }
                ServiceState::Recording => {
                    if let Err(e) = service.stop_recording().await {
                        warn!("could not stop: {e}");
                    }
                }
                ServiceState::Transcribing => {
                    info!("transcription still running");
                }
            },
            other => info!("unknown input '{other}' (Enter toggles, 'q' quits)"),
        }
    }

    service.abort().await;
    temp.shutdown().await;
    info!("bye");
    Ok(())
}
