//! CLI error type.

use std::fmt;

use viewgrab::config::ConfigError;
use viewgrab::http::TransportError;
use viewgrab::logging::LoggingError;
use viewgrab::DownloadError;

/// Faults that end the run with a non-zero exit code.
#[derive(Debug)]
pub enum CliError {
    /// Invalid combination of arguments and settings.
    Config(String),
    /// The configuration file could not be read or interpreted.
    ConfigFile(ConfigError),
    /// Logging could not be set up.
    Logging(LoggingError),
    /// The HTTP client could not be built, e.g. a malformed proxy URL.
    Client(TransportError),
    /// Local storage failed during the download.
    Download(DownloadError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Logging(e) => write!(f, "{}", e),
            CliError::Client(e) => write!(f, "cannot set up HTTP client: {}", e),
            CliError::Download(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(_) => None,
            CliError::ConfigFile(e) => Some(e),
            CliError::Logging(e) => Some(e),
            CliError::Client(e) => Some(e),
            CliError::Download(e) => Some(e),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<TransportError> for CliError {
    fn from(e: TransportError) -> Self {
        CliError::Client(e)
    }
}

impl From<DownloadError> for CliError {
    fn from(e: DownloadError) -> Self {
        CliError::Download(e)
    }
}
