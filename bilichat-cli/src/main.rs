mod config;
mod output;

use anyhow::{Context, Result, anyhow};
use bilichat::{Credentials, Session, StreamItem};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppConfig, Loaded};
use crate::output::{MessageLog, OutputManager};

/// Default log filter directive.
const DEFAULT_LOG_FILTER: &str = "bilichat=info,bilichat_cli=info";
const VERBOSE_LOG_FILTER: &str = "bilichat=debug,bilichat_cli=debug";

/// Set to `1` to dump every decoded frame next to the logs.
const DEBUG_ENV: &str = "BILICHAT_DEBUG";

/// Bilibili live danmaku in the terminal.
///
/// Chat, gifts and room stats are printed as they arrive; lines typed on
/// stdin are sent to the room as chat messages.
#[derive(Debug, Parser)]
#[command(name = "bilichat", version, about)]
struct Args {
    /// Live room id (overrides the config file)
    #[arg(short = 'i', long = "id")]
    room_id: Option<u64>,

    /// Cookie header of a logged-in session (overrides the config file)
    #[arg(long, env = "BILICHAT_COOKIE", hide_env_values = true)]
    cookie: Option<String>,

    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let output = OutputManager::new(!args.no_color);

    if let Err(e) = run(args).await {
        eprintln!("{}", output.format_error(&format!("{e:#}")));
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config_path = match args.config.clone() {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };

    let config = match AppConfig::load_or_create(&config_path)? {
        Loaded::Config(config) => config,
        Loaded::Created(path) => {
            println!(
                "Configuration {} has been generated, please fill in `cookie` and `room_id`",
                path.display()
            );
            return Ok(());
        }
    };
    let config = config.merge_args(args.room_id, args.cookie);
    config.validate()?;

    let log_dir = config.log_dir(&config_path);
    let _guard = init_logging(&log_dir, args.verbose)?;

    let mut session_config = config.session_config();
    if session_config.dump_dir.is_none() && std::env::var(DEBUG_ENV).is_ok_and(|v| v == "1") {
        session_config.dump_dir = Some(log_dir.join("frames"));
    }
    if let Some(dir) = &session_config.dump_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let output = OutputManager::new(!args.no_color);
    let mut history = MessageLog::new(config.history);

    info!(room_id = config.room_id, "Starting bilichat");
    let handle = Session::new(Credentials::parse(&config.cookie), config.room_id)?
        .with_config(session_config)
        .start()
        .await
        .context("Failed to start danmaku session")?;
    let (mut events, mut snapshots, controller) = handle.into_parts();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            item = events.recv() => match item {
                Some(StreamItem::Event(event)) => {
                    history.record(&event);
                    println!("{}", output.format_event(&event));
                }
                Some(StreamItem::Closed { reason }) => {
                    eprintln!("{}", output.format_error(&format!("connection closed: {reason}")));
                    break;
                }
                None => break,
            },
            Some(snapshot) = snapshots.recv() => {
                println!("{}", output.format_snapshot(&snapshot));
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        if let Err(e) = controller.send_message(line).await {
                            eprintln!("{}", output.format_error(&e.to_string()));
                        }
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    controller.stop().await;
    println!("{}", history.summary());
    Ok(())
}

/// Log to a daily-rotated file; stdout is reserved for chat output.
///
/// The returned guard must be kept alive for buffered lines to be flushed.
fn init_logging(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "bilichat.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .map_err(|e| anyhow!("Failed to set global default subscriber: {}", e))?;

    Ok(guard)
}
