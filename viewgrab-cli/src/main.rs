//! viewgrab CLI - Command-line interface
//!
//! Downloads a range of images from an archive viewer page into a local
//! directory, one at a time.

mod error;
mod options;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use console::style;

use crate::options::SpendPolicy;

/// Sequential image downloader for an authenticated archive viewer.
#[derive(Debug, Parser)]
#[command(name = "viewgrab", version, about, long_about = None)]
pub struct Cli {
    /// Viewer page that embeds the image list
    #[arg(short = 'u', long)]
    pub url: Option<String>,

    /// Directory to save images into (default: a timestamped directory)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// First image to download, counting from 1
    #[arg(short = 's', long, default_value_t = 1)]
    pub start: usize,

    /// Last image to download (default: the last one)
    #[arg(short = 'e', long)]
    pub end: Option<usize>,

    /// Account username
    #[arg(short = 'n', long)]
    pub username: Option<String>,

    /// Account password
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Whether a paid subscription may be activated when the server asks for one
    #[arg(long = "allowed-spend-money", value_enum)]
    pub allowed_spend_money: Option<SpendPolicy>,

    /// Configuration file (default: <config dir>/viewgrab/config.ini)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Verbose logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match run::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    };

    println!("Done!");
    code
}
