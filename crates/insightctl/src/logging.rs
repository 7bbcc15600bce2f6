//! Diagnostics go to stderr so they never mix with report output on
//! stdout, which is what gets piped or redirected.

use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// Diagnostic verbosity on stderr
    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Warn, global = true)]
    pub level: LogLevel,

    /// Diagnostic output format. Defaults to colored text on a terminal
    /// and JSON lines otherwise
    #[arg(long = "log-format", value_enum, global = true)]
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line, for log collectors
    Json,
    /// Plain text without colors
    Plain,
    /// Colored text for interactive terminals
    Pretty,
}

/// Install the global subscriber. Must run before any command logic;
/// panics if called twice.
pub fn init_logging(args: &LogArgs) {
    let format = args.format.unwrap_or({
        if atty::is(atty::Stream::Stderr) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(args.level.filter())
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().flatten_event(true).init(),
        LogFormat::Plain => builder.compact().with_ansi(false).init(),
        LogFormat::Pretty => builder.compact().with_ansi(true).init(),
    }
}
