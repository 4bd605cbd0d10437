//! Focal CLI
//!
//! Runs the tutoring API server, or asks questions against a server or an
//! in-process gateway.

mod render;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use focal_session::{
    loading_phrase, GenerationSource, HttpSource, LocalSource, SessionController, SessionUpdate,
    Submission, LOADING_TICK,
};
use focal_tutor::{
    create_router, AppState, Config, ImagePayload, LlmProvider, ResponseOptions, SectionKind,
    SectionSet,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::render::{Renderer, View};

/// Exit code used when the user aborts a one-shot question.
const EXIT_ABORTED: u8 = 130;

/// Focal - a tutor that explains, section by section
///
/// Classifies each question by subject, tunes the explanation to the
/// learner's level and streams a structured answer.
#[derive(Parser, Debug)]
#[command(name = "focal")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: focal.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API server
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port for the HTTP API server
        #[arg(short, long)]
        port: Option<u16>,

        /// Language model backend (gemini or echo)
        #[arg(long)]
        provider: Option<LlmProvider>,
    },

    /// Ask a question; without one, start an interactive chat
    Ask(AskArgs),
}

#[derive(clap::Args, Debug)]
struct AskArgs {
    /// The question to ask
    #[arg(value_name = "QUESTION")]
    question: Option<String>,

    /// URL of a running Focal server (default: answer in-process)
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    /// Language model backend for in-process answers (gemini or echo)
    #[arg(long)]
    provider: Option<LlmProvider>,

    /// Sections to include, comma separated (summary,guidance,explanation,answer)
    #[arg(long, value_delimiter = ',', value_name = "LIST")]
    sections: Option<Vec<SectionKind>>,

    /// Ask for a single undivided answer
    #[arg(long, conflicts_with = "sections")]
    no_sections: bool,

    /// Learner's understanding, 0 (shallow) to 1 (deep)
    #[arg(long, value_name = "0..1")]
    understanding: Option<f64>,

    /// Answer thoroughness, 0 (terse) to 1 (thorough)
    #[arg(long, value_name = "0..1")]
    politeness: Option<f64>,

    /// Attach an image (repeatable); sent with the first question
    #[arg(short, long = "image", value_name = "FILE")]
    images: Vec<PathBuf>,

    /// How to print answers
    #[arg(long, value_enum, default_value_t = View::Sections)]
    view: View,
}

/// How a single turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Aborted,
    Failed,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    let result = match args.command {
        Command::Serve {
            host,
            port,
            provider,
        } => serve(args.config.as_deref(), host, port, provider)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Ask(ask_args) => ask(args.config.as_deref(), ask_args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

// ============================================================================
// serve
// ============================================================================

async fn serve(
    config_path: Option<&str>,
    host: Option<String>,
    port: Option<u16>,
    provider: Option<LlmProvider>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(provider) = provider {
        config.llm_provider = provider;
    }
    config.validate()?;

    let gateway = config.gateway()?;
    print_config(&config);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port")
    })?;

    tracing::info!(%addr, provider = %config.llm_provider, "Focal API listening");
    println!("Focal API running on http://{addr}");
    println!("Press Ctrl+C to stop");

    let router = create_router(AppState::new(config, gateway));
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received Ctrl+C, shutting down");
        })
        .await?;
    Ok(())
}

// ============================================================================
// ask
// ============================================================================

async fn ask(config_path: Option<&str>, args: AskArgs) -> anyhow::Result<ExitCode> {
    let mut config = load_config(config_path)?;
    if let Some(provider) = args.provider {
        config.llm_provider = provider;
    }
    config.validate()?;

    let options = response_options(&config, &args)?;
    let mut images = load_images(&config, &args.images)?;

    let source: Arc<dyn GenerationSource> = match &args.server {
        Some(url) => {
            let source = HttpSource::new(url.as_str());
            let health = source.health().await.map_err(|e| {
                anyhow::anyhow!("Cannot reach Focal server at {url}: {e}\n\nSuggestion: Start it with `focal serve`")
            })?;
            tracing::info!(provider = %health.provider, model = %health.model, "Connected to server");
            Arc::new(source)
        }
        None => Arc::new(LocalSource::new(config.gateway()?)),
    };
    let mut controller = SessionController::new(source);

    if let Some(question) = args.question {
        let submission = Submission {
            text: question,
            images,
            options,
        };
        let code = match run_turn(&mut controller, submission, args.view).await? {
            Outcome::Completed => ExitCode::SUCCESS,
            Outcome::Aborted => ExitCode::from(EXIT_ABORTED),
            Outcome::Failed => ExitCode::from(1),
        };
        return Ok(code);
    }

    println!("Ask a question. /clear starts a new conversation, /quit exits, Ctrl+C aborts an answer.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            Ok(()) = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match line.trim() {
            "" if images.is_empty() => {}
            "/quit" | "/exit" => break,
            "/clear" => {
                controller.clear()?;
                println!("Started a new conversation");
            }
            question => {
                let submission = Submission {
                    text: question.to_string(),
                    images: std::mem::take(&mut images),
                    options,
                };
                run_turn(&mut controller, submission, args.view).await?;
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Submits one question and renders its answer until it ends.
async fn run_turn(
    controller: &mut SessionController,
    submission: Submission,
    view: View,
) -> anyhow::Result<Outcome> {
    let has_images = !submission.images.is_empty();
    let mut renderer = Renderer::new(std::io::stdout(), view, submission.options.sections);
    controller.submit(submission)?;

    let mut ticker = tokio::time::interval(LOADING_TICK);
    let mut tick = 0usize;

    loop {
        tokio::select! {
            update = controller.next_event() => {
                let Some(update) = update else {
                    renderer.finish()?;
                    return Ok(Outcome::Failed);
                };
                match update {
                    SessionUpdate::Started { category, .. } => {
                        eprintln!("[{category}]");
                    }
                    SessionUpdate::Chunk { text, .. } => renderer.chunk(&text)?,
                    SessionUpdate::Completed { .. } => {
                        renderer.finish()?;
                        return Ok(Outcome::Completed);
                    }
                    SessionUpdate::Failed { message, .. } => {
                        renderer.finish()?;
                        eprintln!("Error: {message}");
                        return Ok(Outcome::Failed);
                    }
                    SessionUpdate::Ignored => {}
                }
            }
            _ = ticker.tick(), if !renderer.has_output() => {
                eprintln!("{}", loading_phrase(0, tick, has_images));
                tick += 1;
            }
            Ok(()) = tokio::signal::ctrl_c() => {
                if let Err(e) = controller.abort() {
                    tracing::debug!(error = %e, "Nothing to abort");
                }
                renderer.finish()?;
                eprintln!("(answer aborted)");
                return Ok(Outcome::Aborted);
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Applies the section and slider flags on top of the configured defaults.
fn response_options(config: &Config, args: &AskArgs) -> anyhow::Result<ResponseOptions> {
    let mut options = config.defaults;
    if args.no_sections {
        options.sections = SectionSet::empty();
    } else if let Some(kinds) = &args.sections {
        options.sections = SectionSet::of(kinds);
    }
    if let Some(understanding) = args.understanding {
        options.sliders.understanding = understanding;
    }
    if let Some(politeness) = args.politeness {
        options.sliders.politeness = politeness;
    }
    options.validate()?;
    Ok(options)
}

/// Reads image files, enforcing the configured limits.
fn load_images(config: &Config, paths: &[PathBuf]) -> anyhow::Result<Vec<ImagePayload>> {
    let limits = config.image_limits();
    if paths.len() > limits.max_images {
        anyhow::bail!(
            "Too many images: {} (at most {})",
            paths.len(),
            limits.max_images
        );
    }

    paths
        .iter()
        .map(|path| {
            let image = ImagePayload::load(path)
                .map_err(|e| anyhow::anyhow!("Failed to load image '{}': {e}", path.display()))?;
            if image.bytes.len() > limits.max_image_bytes {
                anyhow::bail!(
                    "Image '{}' is larger than {} bytes",
                    path.display(),
                    limits.max_image_bytes
                );
            }
            tracing::debug!(path = %path.display(), mime = %image.mime_type, size = image.bytes.len(), "Image loaded");
            Ok(image)
        })
        .collect()
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  LLM provider: {}", config.llm_provider);
    println!("  Model: {}", config.model);
    println!("  Classifier model: {}", config.classifier_model());
    println!(
        "  Default sections: {}",
        config
            .defaults
            .sections
            .iter()
            .map(SectionKind::label)
            .collect::<Vec<_>>()
            .join(", ")
    );
}
