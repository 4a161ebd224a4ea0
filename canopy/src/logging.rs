// Logging for Canopy
//
// Canopy logs through the `tracing` ecosystem. Runtime threads (scheduler
// workers, dedicated root threads) capture the dispatcher of the thread that
// created them, so a subscriber installed with `set_default` in a test also
// sees events from those threads.
//
// # Usage Examples
//
// ## Basic Initialization
//
// ```rust
// use canopy::logging;
//
// // INFO level, console output
// logging::init_default();
//
// // Or a custom configuration
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     json_format: false,
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// ## Child Processes
//
// A process started by a client proxy announces its port on stdout, so
// its logs must never go there. Use `LogConfig::stderr()` in such programs:
//
// ```rust
// use canopy::logging::{self, LogConfig};
//
// logging::init(LogConfig::stderr());
// ```
//
// ## Using Log Macros
//
// ```rust
// use canopy::{log_lifecycle, root_span};
//
// let span = root_span!("synth");
// let _guard = span.enter();
// log_lifecycle!("synth", "activated");
// ```

use std::io;
use std::sync::Once;
use tracing::{Level, Subscriber};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Where console output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
}

/// Configuration for the Canopy logging system
///
/// # Examples
///
/// ```rust
/// use canopy::logging::LogConfig;
/// use tracing::Level;
///
/// let custom_config = LogConfig {
///     level: Level::DEBUG,
///     target_filters: Some("canopy::proxy=trace".to_string()),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
    /// Console stream
    pub target: LogTarget,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
            target: LogTarget::Stdout,
        }
    }
}

impl LogConfig {
    /// Default settings writing to stderr.
    pub fn stderr() -> Self {
        Self {
            target: LogTarget::Stderr,
            ..Self::default()
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut env_filter = EnvFilter::from_default_env().add_directive(self.level.into());
        if let Some(filters) = &self.target_filters {
            for filter in filters.split(',') {
                if let Ok(directive) = filter.parse() {
                    env_filter = env_filter.add_directive(directive);
                }
            }
        }
        env_filter
    }

    fn ansi(&self) -> bool {
        match self.target {
            LogTarget::Stdout => atty::is(atty::Stream::Stdout),
            LogTarget::Stderr => atty::is(atty::Stream::Stderr),
        }
    }
}

static INIT: Once = Once::new();

/// Initialize the logging system with the given configuration
///
/// Installs the global subscriber. Only the first call takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(config.env_filter());
        let ansi = config.ansi();
        let subscriber: Box<dyn Subscriber + Send + Sync> = match (config.json_format, config.target) {
            (true, LogTarget::Stdout) => Box::new(registry.with(fmt::layer().json().flatten_event(true))),
            (true, LogTarget::Stderr) => Box::new(
                registry.with(fmt::layer().json().flatten_event(true).with_writer(io::stderr)),
            ),
            (false, target) => {
                let layer = fmt::layer()
                    .with_ansi(ansi)
                    .with_file(config.show_file_line)
                    .with_line_number(config.show_file_line)
                    .with_thread_names(config.show_thread_info)
                    .with_thread_ids(config.show_thread_info);
                match target {
                    LogTarget::Stdout => Box::new(registry.with(layer)),
                    LogTarget::Stderr => Box::new(registry.with(layer.with_writer(io::stderr))),
                }
            }
        };
        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Opens `path` in append mode for use as a log writer.
///
/// # Errors
/// Returns an error if the file cannot be opened or created
pub fn file_writer(path: &str) -> io::Result<Box<dyn io::Write + Send + Sync + 'static>> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

/// Initialize logging with both console and file output
///
/// File output is always plain text with location and thread information.
///
/// # Errors
/// Returns an error if the log file cannot be opened
pub fn init_with_file(config: LogConfig, log_file: &str) -> Result<(), io::Error> {
    // Fail early instead of silently falling back to stderr per event.
    drop(file_writer(log_file)?);
    INIT.call_once(|| {
        let console_layer = fmt::layer()
            .with_ansi(config.ansi())
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info)
            .with_writer(io::stderr);

        let log_file_path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || match file_writer(&log_file_path) {
                Ok(writer) => writer,
                Err(_) => Box::new(io::stderr()),
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(config.env_filter())
            .with(console_layer)
            .with(file_layer);
        set_global_subscriber(subscriber);
    });
    Ok(())
}

/// INFO level with human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// Debug output with location information; link traffic at trace level.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        target_filters: Some("canopy=debug,canopy::proxy=trace".to_string()),
        ..LogConfig::default()
    });
}

/// JSON output on stderr without file/line information.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        target: LogTarget::Stderr,
        ..LogConfig::default()
    });
}

/// Warnings and errors only, to keep test output clean.
///
/// ```rust
/// #[test]
/// fn my_test() {
///     canopy::logging::init_test();
///     // ...
/// }
/// ```
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        show_thread_info: false,
        show_time: false,
        ..LogConfig::default()
    });
}

/// Create a span covering work done on behalf of a root
///
/// # Examples
///
/// ```rust
/// use canopy::root_span;
///
/// let span = root_span!("/synth");
/// let _guard = span.enter();
///
/// let span = root_span!("/synth", call_id = 42);
/// ```
#[macro_export]
macro_rules! root_span {
    ($root:expr) => {
        tracing::debug_span!("root", root = $root)
    };
    ($root:expr, $($fields:tt)*) => {
        tracing::debug_span!("root", root = $root, $($fields)*)
    };
}

/// Log root lifecycle events
///
/// ```rust
/// use canopy::log_lifecycle;
///
/// log_lifecycle!("/synth", "activated");
/// log_lifecycle!("/synth", "terminated", pending = 3);
/// ```
#[macro_export]
macro_rules! log_lifecycle {
    ($root:expr, $event:expr) => {
        tracing::info!(root = $root, event = $event);
    };
    ($root:expr, $event:expr, $($fields:tt)*) => {
        tracing::info!(root = $root, event = $event, $($fields)*);
    };
}

/// Log link events between peers
///
/// ```rust
/// use canopy::log_link;
///
/// log_link!("a3f1", "connected");
/// log_link!("a3f1", "closed", reason = "eof");
/// ```
#[macro_export]
macro_rules! log_link {
    ($peer:expr, $event:expr) => {
        tracing::debug!(peer = %$peer, link = $event);
    };
    ($peer:expr, $event:expr, $($fields:tt)*) => {
        tracing::debug!(peer = %$peer, link = $event, $($fields)*);
    };
}

/// The dispatcher of the calling thread.
///
/// Runtime threads are started with the dispatcher captured here so their
/// events reach the same subscriber as the thread that created them.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

pub use tracing::{debug, error, info, trace, warn};
