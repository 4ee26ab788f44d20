//! Subscriber setup for the registry's `tracing` events.
//!
//! Every event the registry emits uses the `di_registry` target, so a filter
//! on that target isolates registration, validation and build activity from
//! the rest of an application.
//!
//! # Features
//!
//! - `logging` - emit events (default)
//! - `logging-json` - JSON subscriber output
//! - `logging-pretty` - human-readable subscriber output
//!
//! # Example
//!
//! ```rust,ignore
//! use di_registry::logging;
//!
//! logging::init();
//!
//! logging::builder()
//!     .trace()
//!     .registry_only()
//!     .compact()
//!     .init();
//! ```

#[cfg(feature = "logging")]
use tracing::Level;

/// Target of every event this crate emits.
pub const TARGET: &str = "di_registry";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    /// Single line per event.
    Compact,
}

/// Builder for the global subscriber.
#[cfg(feature = "logging")]
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    with_file: bool,
    with_line_number: bool,
    with_thread_names: bool,
}

#[cfg(feature = "logging")]
impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            with_file: false,
            with_line_number: false,
            with_thread_names: false,
        }
    }
}

#[cfg(feature = "logging")]
impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Include memoized-instance hits, which are logged at TRACE.
    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    /// Only cycles, skipped instances and failed optional dependencies.
    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Drop events from every target but [`TARGET`].
    pub fn registry_only(self) -> Self {
        self.with_target_filter(TARGET)
    }

    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    /// Useful when several threads race to build the same instance.
    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    fn filter_directive(&self) -> String {
        match self.target {
            Some(target) => format!("{}={}", target, self.level),
            None => self.level.to_string(),
        }
    }

    /// Install the subscriber. Does nothing if one is already installed.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = EnvFilter::new(self.filter_directive());
        let layer = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_names(self.with_thread_names)
            .with_target(true);

        let result = match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .try_init(),
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(filter)
                .with(layer.pretty())
                .try_init(),
            LogFormat::Compact => tracing_subscriber::registry()
                .with(filter)
                .with(layer.compact())
                .try_init(),
        };
        // a subscriber installed by the application wins
        let _ = result;
    }

    /// No subscriber feature enabled: events go to whatever the application installed.
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) {}
}

#[cfg(feature = "logging")]
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// JSON when `logging-json` is enabled, pretty otherwise.
#[cfg(feature = "logging")]
pub fn init() {
    #[cfg(feature = "logging-json")]
    init_json();
    #[cfg(not(feature = "logging-json"))]
    init_pretty();
}

/// JSON lines, for log aggregation.
///
/// ```json
/// {"timestamp":"2026-01-01T00:00:00.000Z","level":"DEBUG","fields":{"message":"Building instance","service":"app::Database","name":"","depth":1},"target":"di_registry"}
/// ```
#[cfg(feature = "logging")]
pub fn init_json() {
    builder().json().init();
}

/// Colored multi-line output for development.
#[cfg(feature = "logging")]
pub fn init_pretty() {
    builder().pretty().init();
}

/// Registry events only, at DEBUG.
#[cfg(feature = "logging")]
pub fn init_registry_only() {
    builder().registry_only().pretty().init();
}
