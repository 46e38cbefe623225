use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use passport_contracts::events::{state_payload, EventWriter};
use passport_contracts::pipeline::{PipelineState, PROCESSING_STAGES};
use passport_contracts::report::{present_report, render_report};
use passport_engine::{
    default_studio_registry, Pacing, PipelineObserver, SourceFile, StageController, StateChange,
    StudioConfig, Transition,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const REPORT_FILE_NAME: &str = "validation_report.txt";

#[derive(Debug, Parser)]
#[command(name = "passport-rs", version, about = "AI passport photo generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate and validate a passport photo from a portrait.
    Run(RunArgs),
    /// Render a saved compliance report.
    Present(PresentArgs),
    /// List the available collaborator backends.
    Studios,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    photo: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Overrides PASSPORT_STUDIO.
    #[arg(long)]
    studio: Option<String>,
    /// Declared media type of the photo; guessed from the file otherwise.
    #[arg(long)]
    mime: Option<String>,
    #[arg(long)]
    no_pacing: bool,
}

#[derive(Debug, Parser)]
struct PresentArgs {
    #[arg(long)]
    report: PathBuf,
}

fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "passport_cli=info,passport_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("passport-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = StudioConfig::from_env();
    match cli.command {
        Command::Run(args) => run_pipeline(args, &config),
        Command::Present(args) => {
            print!("{}", present_report_file(&args.report)?);
            Ok(0)
        }
        Command::Studios => {
            for name in default_studio_registry(&config).names() {
                let marker = if name == config.studio { " (default)" } else { "" };
                println!("{name}{marker}");
            }
            Ok(0)
        }
    }
}

fn run_pipeline(args: RunArgs, config: &StudioConfig) -> Result<i32> {
    let studio_name = args.studio.clone().unwrap_or_else(|| config.studio.clone());
    let registry = default_studio_registry(config);
    let Some(studio) = registry.get(&studio_name) else {
        bail!(
            "unknown studio '{studio_name}' (available: {})",
            registry.names().join(", ")
        );
    };
    let pacing = if args.no_pacing {
        Pacing::none()
    } else {
        config.pacing
    };

    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventWriter::new(&events_path, session_id());
    let controller = StageController::from_studio(studio).with_pacing(pacing);
    controller.subscribe(EventLog { events });
    controller.subscribe(print_progress);

    let source = match args.mime.as_deref() {
        Some(mime) => SourceFile::new(&args.photo, mime),
        None => SourceFile::from_path(&args.photo),
    };
    tracing::info!(
        studio = %studio_name,
        photo = %source.path.display(),
        mime_type = %source.mime_type,
        "starting pipeline"
    );

    let state = controller.start(&source)?;
    match &state {
        PipelineState::Result { photo, report, .. } => {
            let download = photo.write_download(&args.out)?;
            let report_path = args.out.join(REPORT_FILE_NAME);
            fs::write(&report_path, report.as_str())
                .with_context(|| format!("failed to write {}", report_path.display()))?;

            println!();
            println!("Passport photo: {}", download.display());
            println!();
            println!("AI Validation Check");
            print!("{}", render_report(&present_report(report.as_str())));
            Ok(0)
        }
        _ => {
            eprintln!(
                "{}",
                state.error().unwrap_or("Generation failed: An unknown error occurred.")
            );
            Ok(1)
        }
    }
}

fn present_report_file(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read report {}", path.display()))?;
    Ok(render_report(&present_report(&text)))
}

/// Mirrors every state change into `events.jsonl`.
struct EventLog {
    events: EventWriter,
}

impl PipelineObserver for EventLog {
    fn on_state_change(&self, change: &StateChange) {
        let event_type = match change.transition {
            Transition::StageEntered(_) => "stage_entered",
            Transition::PreviewReady => "preview_ready",
            Transition::Completed => "run_completed",
            Transition::Failed => "run_failed",
            Transition::Reset => "reset",
        };
        if let Err(err) = self.events.emit(event_type, state_payload(&change.state)) {
            tracing::warn!(
                path = %self.events.path().display(),
                error = %err,
                "failed to append pipeline event"
            );
        }
    }
}

fn print_progress(change: &StateChange) {
    match change.transition {
        Transition::StageEntered(stage) => {
            println!(
                "[{}/{}] {}",
                stage.index() + 1,
                PROCESSING_STAGES.len(),
                stage.label()
            );
        }
        Transition::PreviewReady => {
            if let Some(upload) = change.state.uploaded() {
                println!("      original: {} ({} bytes)", upload.mime_type, upload.byte_len);
            }
        }
        Transition::Completed | Transition::Failed | Transition::Reset => {}
    }
}

fn session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}
