//! Merging command-line arguments with the configuration file.

use std::path::PathBuf;

use clap::ValueEnum;
use viewgrab::config::{ConfigError, ConfigFile};
use viewgrab::range::DownloadRange;

use crate::error::CliError;
use crate::Cli;

/// Answer to `--allowed-spend-money`.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum SpendPolicy {
    /// Never activate a paid subscription
    No,
    /// Activate a subscription when the server requires one
    Yes,
}

impl SpendPolicy {
    pub fn allows(self) -> bool {
        self == SpendPolicy::Yes
    }
}

/// Everything a run needs, CLI values taking precedence over the file.
#[derive(Debug)]
pub struct RunSettings {
    pub config: ConfigFile,
    pub index_url: String,
    pub output: PathBuf,
    pub range: DownloadRange,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
}

/// Load the configuration file named by `--config`, or the default one.
pub fn load_config(cli: &Cli) -> Result<ConfigFile, CliError> {
    match &cli.config {
        Some(path) if !path.exists() => Err(CliError::Config(format!(
            "Configuration file {} does not exist",
            path.display()
        ))),
        Some(path) => Ok(ConfigFile::load_from(path)?),
        None => Ok(ConfigFile::load()?),
    }
}

/// Apply CLI overrides on top of `config` and validate the result.
pub fn resolve(cli: Cli, mut config: ConfigFile) -> Result<RunSettings, CliError> {
    if let Some(url) = cli.url {
        config.remote.url = Some(url);
    }
    if let Some(output) = cli.output {
        config.local.directory = Some(output);
    }
    if let Some(username) = cli.username {
        config.remote.username = Some(username);
    }
    if let Some(password) = cli.password {
        config.remote.password = Some(password);
    }
    if let Some(policy) = cli.allowed_spend_money {
        config.remote.allow_spend = policy.allows();
    }

    let index_url = config.index_url().ok_or(ConfigError::MissingIndexUrl)?;
    if !config.to_session().credentials.is_complete() {
        return Err(ConfigError::MissingCredentials.into());
    }
    let output = config.output_directory();

    Ok(RunSettings {
        config,
        index_url,
        output,
        range: DownloadRange::new(cli.start, cli.end),
        verbose: cli.verbose,
        log_file: cli.log_file,
    })
}
