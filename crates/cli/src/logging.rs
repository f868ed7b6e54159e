//! Log setup for the CLI. Everything goes to `<data_dir>/logs/client.log`;
//! `-v` flags additionally mirror events to stderr so stdout stays reserved
//! for command output.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info,consultline_client=debug,reqwest=warn,tungstenite=warn";
const LOG_FILE: &str = "client.log";

/// Shape of the log file. Plain text unless `CONSULTLINE_LOG_FORMAT=json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "compact" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("unknown log format: {}", s.trim())),
        }
    }
}

/// Level mirrored to stderr for a given `-v` count.
pub fn terminal_level(verbosity: u8) -> Option<LevelFilter> {
    match verbosity {
        0 => None,
        1 => Some(LevelFilter::INFO),
        2 => Some(LevelFilter::DEBUG),
        _ => Some(LevelFilter::TRACE),
    }
}

pub struct LoggingHandle {
    _guard: WorkerGuard,
    pub log_path: PathBuf,
}

pub fn init_logging(data_dir: &Path, verbosity: u8) -> anyhow::Result<LoggingHandle> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join(LOG_FILE);

    if std::env::var("CONSULTLINE_TRUNCATE_LOG_ON_START").as_deref() == Ok("1") {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path)?;
    }

    let filter = std::env::var("CONSULTLINE_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));
    let format = std::env::var("CONSULTLINE_LOG_FORMAT")
        .ok()
        .and_then(|value| value.parse::<LogFormat>().ok())
        .unwrap_or_default();

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, LOG_FILE));
    let file_layer = match format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .compact()
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(writer)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
    }
    .with_filter(filter);

    let terminal_layer = terminal_level(verbosity).map(|level| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(console::colors_enabled_stderr())
            .without_time()
            .with_target(false)
            .with_filter(level)
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(terminal_layer)
        .try_init()?;

    tracing::debug!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_path.display(),
        format = ?format,
        verbosity,
        pid = std::process::id(),
    );

    Ok(LoggingHandle {
        _guard: guard,
        log_path,
    })
}
