//! logwatch - watch log files for lines matching patterns.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use logwatch::config::{ConfigError, ConfigLoader, LogwatchConfig};
use logwatch::discovery::{DiscoveryError, Scan, ScanOptions};
use logwatch::display;
use logwatch::watcher::{Engine, EngineError, EngineEvent};

#[derive(Parser)]
#[command(
    name = "logwatch",
    about = "Watch log files for lines matching patterns",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch configured directories and files until interrupted.
    Watch,
    /// Scan a directory tree for log files.
    Scan {
        /// Root of the tree.
        root: PathBuf,
        /// Add discovered files to the index.
        #[arg(long)]
        register: bool,
    },
    /// Show whether paths are recognized as log files.
    Classify {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show indexed files and match counts.
    Status,
    /// Reset the match count of one file, or of all files.
    Reset {
        path: Option<PathBuf>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            token.cancel();
        }
    });
}

type Events = tokio::sync::mpsc::UnboundedReceiver<EngineEvent>;

fn open_engine(config: &LogwatchConfig) -> Result<(Engine, Events), CliError> {
    let seeds = config.seeds()?;
    Ok(Engine::open(
        config.watch.engine_settings(),
        Some(config.index_path()),
        seeds,
    ))
}

/// Print events as they arrive until every sender is gone.
fn spawn_printer(mut events: Events, config: &LogwatchConfig) -> tokio::task::JoinHandle<()> {
    let editor = config.editor.clone();
    let bell = config.sound_enabled;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            display::print_event(&event, Some(&editor));
            if bell && matches!(event, EngineEvent::Match { .. }) {
                print!("\x07");
            }
        }
    })
}

async fn watch(config: &LogwatchConfig) -> Result<(), CliError> {
    let (engine, events) = open_engine(config)?;
    let printer = spawn_printer(events, config);

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    tracing::info!(directories = engine.directories().len(), "Watching");
    engine.run(shutdown).await;
    printer.abort();
    Ok(())
}

async fn scan(config: &LogwatchConfig, root: PathBuf, register: bool) -> Result<(), CliError> {
    if register {
        let (engine, events) = open_engine(config)?;
        let printer = spawn_printer(events, config);
        let task = engine.start_scan(&root)?;

        let interrupt = CancellationToken::new();
        cancel_on_ctrl_c(interrupt.clone());
        let scan_engine = engine.clone();
        tokio::spawn(async move {
            interrupt.cancelled().await;
            scan_engine.cancel_scan(&root);
        });

        let outcome = task.join().await?;
        engine.persist().map_err(EngineError::from)?;
        eprintln!("{} log files registered", outcome.found());
        printer.abort();
        return Ok(());
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let options = ScanOptions {
        classifier: config.watch.engine_settings().classifier,
        progress_every: config.watch.scan_progress_every.max(1),
    };
    let outcome = tokio::task::spawn_blocking(move || {
        let progress_root = root.clone();
        let scan = Scan::new(root, options, cancel, |progress| {
            display::print_event(
                &EngineEvent::ScanProgress {
                    root: progress_root.clone(),
                    progress,
                },
                None,
            );
        })?;
        Ok::<_, DiscoveryError>(scan.run(|path| println!("{}", path.display())))
    })
    .await??;
    eprintln!(
        "{} log files{}",
        outcome.found(),
        if outcome.is_cancelled() { " (cancelled)" } else { "" }
    );
    Ok(())
}

fn classify(config: &LogwatchConfig, paths: &[PathBuf]) {
    let classifier = config.watch.engine_settings().classifier;
    for path in paths {
        display::print_classification(path, &classifier.classify(path));
    }
}

fn status(config: &LogwatchConfig) -> Result<(), CliError> {
    let (engine, _events) = open_engine(config)?;
    display::print_status(
        engine.status(None),
        &engine.files(),
        engine.total_match_count(),
    );
    Ok(())
}

fn reset(config: &LogwatchConfig, path: Option<PathBuf>) -> Result<(), CliError> {
    let (engine, _events) = open_engine(config)?;
    match path {
        Some(path) => engine.reset_count(&path)?,
        None => engine.reset_all_counts(),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let loader = cli
        .config
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let config = loader.load()?;

    match cli.command {
        Commands::Watch => watch(&config).await,
        Commands::Scan { root, register } => scan(&config, root, register).await,
        Commands::Classify { paths } => {
            classify(&config, &paths);
            Ok(())
        }
        Commands::Status => status(&config),
        Commands::Reset { path } => {
            tokio::task::spawn_blocking(move || reset(&config, path)).await?
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
