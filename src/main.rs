#![forbid(unsafe_code)]

//! `live-preview`: run a source file through the live-preview engine.
//!
//! Loads configuration, submits the file to a [`LiveSession`] backed by the
//! preview-host process sandbox, and prints every settled result as one
//! JSON line on stdout. With `--watch` the file is re-submitted on change
//! until interrupted.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use live_preview::models::result::ExecutionResult;
use live_preview::models::source::SourceUnit;
use live_preview::source_watcher::SourceWatcher;
use live_preview::{AppError, LiveSession, PreviewConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "live-preview", about = "Sandboxed live preview of a source file", version, long_about = None)]
struct Cli {
    /// Source file to preview.
    file: PathBuf,

    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Language tag (defaults to the file extension).
    #[arg(long)]
    language: Option<String>,

    /// Re-run whenever the file changes.
    #[arg(long)]
    watch: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => PreviewConfig::load_from_path(path)?,
        None => PreviewConfig::default(),
    };
    config.apply_env_overrides()?;

    let language = resolve_language(&args.file, args.language.as_deref())?;
    info!(
        file = %args.file.display(),
        language = language.as_str(),
        runtime = config.sandbox.runtime_program.as_str(),
        "live-preview starting"
    );

    let session = LiveSession::with_process_backend(config);

    let (settled_tx, mut settled_rx) = mpsc::unbounded_channel::<ExecutionResult>();
    let _subscription = session.subscribe(move |snapshot| {
        if snapshot.state.is_settled() {
            let _ = settled_tx.send(snapshot.clone());
        }
    });

    let mut unit = SourceUnit::new(read_source(&args.file)?, language.as_str()).with_path(&args.file);
    session.submit_unit(&unit)?;
    session.force_refresh()?;

    if !args.watch {
        if let Some(snapshot) = settled_rx.recv().await {
            print_snapshot(&snapshot)?;
        }
        session.dispose();
        return Ok(());
    }

    let (changed_tx, mut changed_rx) = mpsc::unbounded_channel();
    let _watcher = SourceWatcher::new(&args.file, changed_tx)?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            Some(()) = changed_rx.recv() => match read_source(&args.file) {
                Ok(text) => {
                    unit.text = text;
                    session.submit_unit(&unit)?;
                }
                Err(err) => warn!(%err, "failed to re-read source; keeping previous result"),
            },
            Some(snapshot) = settled_rx.recv() => {
                if let Err(err) = print_snapshot(&snapshot) {
                    error!(%err, "failed to write result");
                }
            }
        }
    }

    session.dispose();
    info!("live-preview shut down");
    Ok(())
}

fn resolve_language(file: &Path, explicit: Option<&str>) -> Result<String> {
    if let Some(tag) = explicit {
        return Ok(tag.to_owned());
    }
    file.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            AppError::Config(format!(
                "cannot infer a language for '{}'; pass --language",
                file.display()
            ))
        })
}

fn read_source(file: &Path) -> Result<String> {
    std::fs::read_to_string(file)
        .map_err(|err| AppError::Io(format!("cannot read '{}': {err}", file.display())))
}

fn print_snapshot(snapshot: &ExecutionResult) -> Result<()> {
    use std::io::Write;

    let line = serde_json::to_string(snapshot)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
