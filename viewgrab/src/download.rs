//! Sequential download of an index range.
//!
//! Items are fetched strictly in ascending order, one at a time. A fatal
//! fetch failure at position `i` stops the run: everything before `i` is on
//! disk, nothing after it was requested, and the run can be resumed with
//! `--start i + 1`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::fetch::{FetchEngine, FetchFailure};
use crate::http::HttpClient;
use crate::index::ImageIndex;
use crate::range::{RangeError, ResolvedRange};
use crate::writer::{sequence_stem, FileWriter};

/// Progress callback. Arguments: (number of the item just stored, last number in range).
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Lower bound of the default pause between downloads.
pub const DEFAULT_PAUSE_MIN: Duration = Duration::from_millis(300);

/// Upper bound of the default pause between downloads.
pub const DEFAULT_PAUSE_MAX: Duration = Duration::from_millis(1000);

/// Errors that stop a download without being a fetch failure.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    #[error("failed to store image {number} in {}: {source}", dir.display())]
    WriteFailed {
        number: usize,
        dir: PathBuf,
        source: io::Error,
    },
}

/// How a range download ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeOutcome {
    /// The index had no images.
    Empty,
    /// The requested start lies past the end of the index.
    StartOutOfRange { start: usize, total: usize },
    /// Every item in range was stored.
    Completed { downloaded: usize, last: usize },
    /// A fetch failed fatally. `last_completed` is the 1-based number of the
    /// last stored item (0 if none); `resume_from` is the start that picks
    /// up at the failed item.
    Stopped {
        last_completed: usize,
        resume_from: usize,
        reason: FetchFailure,
    },
}

impl RangeOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, RangeOutcome::Completed { .. })
    }
}

/// Randomized pause between successful downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self::new(DEFAULT_PAUSE_MIN, DEFAULT_PAUSE_MAX)
    }
}

impl Pacing {
    /// Pause uniformly between `min` and `max` (swapped if reversed).
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// No pause at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Draw the next pause length.
    pub fn next_delay(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let secs = rand::rng().random_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// Fetches index items one after another and hands them to a [`FileWriter`].
pub struct SequentialDownloader<W: FileWriter> {
    writer: W,
    pacing: Pacing,
    progress: Option<ProgressCallback>,
}

impl<W: FileWriter> SequentialDownloader<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pacing: Pacing::default(),
            progress: None,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Download index positions `[start0, end0)` into `dest`.
    ///
    /// `end0` past the index is clamped; `start0` past it is reported, not
    /// attempted.
    pub fn download_range<C: HttpClient>(
        &self,
        engine: &mut FetchEngine<C>,
        index: &ImageIndex,
        dest: &Path,
        start0: usize,
        end0: usize,
    ) -> Result<RangeOutcome, DownloadError> {
        let range = match ResolvedRange::new(start0, end0, index.len()) {
            Ok(range) => range,
            Err(RangeError::Empty) => {
                info!("No images found");
                return Ok(RangeOutcome::Empty);
            }
            Err(e @ RangeError::StartOutOfRange { start, total }) => {
                error!("{}", e);
                return Ok(RangeOutcome::StartOutOfRange { start, total });
            }
        };

        ensure_directory(dest)?;

        info!(
            "There are {} images. Downloading from {} to {}.",
            index.len(),
            range.start0 + 1,
            range.end0
        );

        let width = index.number_width();
        for position in range.start0..range.end0 {
            let Some(reference) = index.get(position) else {
                break;
            };
            let number = position + 1;
            let url = engine.session().endpoints.resource_url(reference);

            let resource = match engine.fetch(&url).into_result() {
                Ok(resource) => resource,
                Err(reason) => {
                    warn!(
                        last_completed = position,
                        resume_from = number,
                        reason = %reason,
                        "Download stopped"
                    );
                    return Ok(RangeOutcome::Stopped {
                        last_completed: position,
                        resume_from: number,
                        reason,
                    });
                }
            };

            let stem = sequence_stem(number, width);
            let path = self
                .writer
                .write(dest, &stem, &resource.bytes, resource.content_type.as_deref())
                .map_err(|source| DownloadError::WriteFailed {
                    number,
                    dir: dest.to_path_buf(),
                    source,
                })?;
            debug!(number, path = %path.display(), bytes = resource.bytes.len(), "Stored image");

            if let Some(ref progress) = self.progress {
                progress(number, range.end0);
            }

            if number < range.end0 {
                self.pacing.pause();
            }
        }

        Ok(RangeOutcome::Completed {
            downloaded: range.len(),
            last: range.end0,
        })
    }
}

/// Create `dest` if needed. An existing directory is fine, whatever it holds.
fn ensure_directory(dest: &Path) -> Result<(), DownloadError> {
    if dest.is_dir() {
        info!(path = %dest.display(), "Directory already exists, writing into it");
        return Ok(());
    }
    fs::create_dir_all(dest).map_err(|source| DownloadError::CreateDirFailed {
        path: dest.to_path_buf(),
        source,
    })
}
