//! The download run: wiring, progress display and the final report.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};
use viewgrab::auth::Authenticator;
use viewgrab::download::ProgressCallback;
use viewgrab::entitlement::EntitlementActivator;
use viewgrab::http::ReqwestClient;
use viewgrab::logging::{init_logging, LoggingConfig};
use viewgrab::writer::DiskWriter;
use viewgrab::{run_job, FetchEngine, JobReport, JobSpec, Pacing, RangeOutcome, SequentialDownloader};

use crate::error::CliError;
use crate::options::{load_config, resolve};
use crate::Cli;

/// Run one download as described by `cli` and the configuration file.
pub fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_config(&cli)?;
    let settings = resolve(cli, config)?;

    let _guard = init_logging(&LoggingConfig {
        verbose: settings.verbose,
        log_file: settings.log_file.clone(),
    })?;

    let download = &settings.config.download;
    let session = settings.config.to_session();
    let client = ReqwestClient::for_session(&session, download.timeout())?;
    let authenticator = Authenticator::new(
        EntitlementActivator::new().with_notice_pause(download.notice_pause()),
    );
    let mut engine =
        FetchEngine::new(client, session, authenticator).with_max_attempts(download.max_attempts);

    let bar = progress_bar(settings.verbose);
    let downloader = SequentialDownloader::new(DiskWriter)
        .with_pacing(Pacing::new(download.pause_min(), download.pause_max()))
        .with_progress(progress_callback(bar.clone()));

    let spec = JobSpec {
        index_url: settings.index_url.clone(),
        range: settings.range,
        destination: settings.output.clone(),
    };

    let result = run_job(&mut engine, &downloader, &spec);
    bar.finish_and_clear();
    let report = result?;

    println!("{}", report_message(&report, &spec.destination));

    if report.is_complete() {
        if let Some(destination) = &settings.config.local.destination {
            relocate(&spec.destination, destination);
        }
    }

    Ok(())
}

fn progress_bar(verbose: bool) -> ProgressBar {
    if verbose {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn progress_callback(bar: ProgressBar) -> ProgressCallback {
    Box::new(move |number, last| {
        bar.set_length(last as u64);
        bar.set_position(number as u64);
    })
}

/// User-facing summary of how the run ended.
fn report_message(report: &JobReport, dir: &Path) -> String {
    match report {
        JobReport::IndexUnavailable(reason) => format!(
            "{} could not fetch the image list: {}",
            style("Failed:").red().bold(),
            reason
        ),
        JobReport::IndexUnparsed(reason) => format!(
            "{} the page does not contain an image list: {}",
            style("Failed:").red().bold(),
            reason
        ),
        JobReport::Downloaded { total, outcome } => match outcome {
            RangeOutcome::Empty => "No images found.".to_string(),
            RangeOutcome::StartOutOfRange { start, total } => format!(
                "{} start index {} is greater than the total number of images ({}).",
                style("Nothing to do:").yellow().bold(),
                start,
                total
            ),
            RangeOutcome::Completed { downloaded, last } => format!(
                "{} {} of {} images (up to image {}) saved to {}",
                style("Downloaded").green().bold(),
                downloaded,
                total,
                last,
                dir.display()
            ),
            RangeOutcome::Stopped {
                last_completed,
                resume_from,
                reason,
            } => format!(
                "{} ({})\nDownload stopped at image {}. To resume, run with -s {}.",
                style("Stopped:").yellow().bold(),
                reason,
                last_completed,
                resume_from
            ),
        },
    }
}

/// Move a finished output directory into `destination`, if that exists.
///
/// Failures are logged only; the images are already on disk.
fn relocate(output: &Path, destination: &Path) -> Option<PathBuf> {
    if !destination.is_dir() {
        warn!(
            destination = %destination.display(),
            "Destination directory does not exist, leaving images in place"
        );
        return None;
    }
    let name = output.file_name()?;
    let target = destination.join(name);

    match fs::rename(output, &target) {
        Ok(()) => {
            info!(from = %output.display(), to = %target.display(), "Moved output directory");
            Some(target)
        }
        Err(e) => {
            error!(
                from = %output.display(),
                to = %target.display(),
                error = %e,
                "Failed to move output directory, please move it manually"
            );
            None
        }
    }
}
