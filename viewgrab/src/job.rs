//! One complete run: index page, image list, range download.

use std::path::PathBuf;

use tracing::{error, info};

use crate::download::{DownloadError, RangeOutcome, SequentialDownloader};
use crate::fetch::{FetchEngine, FetchFailure};
use crate::http::HttpClient;
use crate::index::{try_parse_index, IndexError};
use crate::range::DownloadRange;
use crate::writer::FileWriter;

/// What to download and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Viewer page embedding the image list.
    pub index_url: String,
    pub range: DownloadRange,
    pub destination: PathBuf,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    /// The index page itself could not be fetched.
    IndexUnavailable(FetchFailure),
    /// The index page did not contain a recognizable image list.
    IndexUnparsed(IndexError),
    /// The image list was found; `outcome` tells how the range went.
    Downloaded { total: usize, outcome: RangeOutcome },
}

impl JobReport {
    /// Every requested image was stored.
    pub fn is_complete(&self) -> bool {
        matches!(self, JobReport::Downloaded { outcome, .. } if outcome.is_complete())
    }
}

/// Fetch the index page, extract the image list and download the range.
pub fn run_job<C: HttpClient, W: FileWriter>(
    engine: &mut FetchEngine<C>,
    downloader: &SequentialDownloader<W>,
    spec: &JobSpec,
) -> Result<JobReport, DownloadError> {
    info!(directory = %spec.destination.display(), "Saving images");

    let page = match engine.fetch(&spec.index_url).into_result() {
        Ok(page) => page,
        Err(failure) => {
            error!(url = %spec.index_url, reason = %failure, "Failed to get index");
            return Ok(JobReport::IndexUnavailable(failure));
        }
    };

    let index = match try_parse_index(&page.text()) {
        Ok(index) => index,
        Err(e) => {
            error!("{}", e);
            return Ok(JobReport::IndexUnparsed(e));
        }
    };

    let total = index.len();
    let start0 = spec.range.start() - 1;
    let end0 = spec.range.end().unwrap_or(total);
    let outcome = downloader.download_range(engine, &index, &spec.destination, start0, end0)?;

    Ok(JobReport::Downloaded { total, outcome })
}
