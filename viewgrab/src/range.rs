//! User-facing download ranges.
//!
//! Users count images from 1 and name an inclusive range; the downloader
//! works on 0-based half-open ranges. [`DownloadRange::resolve`] bridges the
//! two against the actual index length.

use thiserror::Error;
use tracing::warn;

/// Why a range cannot be downloaded at all.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("no images found")]
    Empty,

    #[error("start index {start} is greater than the total number of images ({total})")]
    StartOutOfRange { start: usize, total: usize },
}

/// Inclusive 1-based range as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadRange {
    start: usize,
    end: Option<usize>,
}

impl Default for DownloadRange {
    fn default() -> Self {
        Self {
            start: 1,
            end: None,
        }
    }
}

impl DownloadRange {
    /// A range starting at `start` (values below 1 are raised to 1).
    ///
    /// An `end` before `start` is ignored and the range runs to the end of
    /// the index.
    pub fn new(start: usize, end: Option<usize>) -> Self {
        Self::adjust(start, end).0
    }

    /// Like [`DownloadRange::new`], also saying whether anything was changed.
    pub fn adjust(start: usize, end: Option<usize>) -> (Self, bool) {
        let mut adjusted = false;
        if start == 0 {
            warn!("Start index must be at least 1. Starting from 1");
            adjusted = true;
        }
        let start = start.max(1);

        let end = match end {
            Some(e) if e < start => {
                warn!(
                    start,
                    end = e,
                    "End index is before the start index. Downloading to the last image"
                );
                adjusted = true;
                None
            }
            other => other,
        };
        (Self { start, end }, adjusted)
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> Option<usize> {
        self.end
    }

    /// Resolve against an index of `total` images.
    pub fn resolve(&self, total: usize) -> Result<ResolvedRange, RangeError> {
        ResolvedRange::new(self.start - 1, self.end.unwrap_or(total), total)
    }
}

/// 0-based half-open range `[start0, end0)` within an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start0: usize,
    pub end0: usize,
    /// `end0` was reduced to the index length.
    pub clamped: bool,
}

impl ResolvedRange {
    /// Validate `start0` and clamp `end0` against `total`.
    pub fn new(start0: usize, end0: usize, total: usize) -> Result<Self, RangeError> {
        if total == 0 {
            return Err(RangeError::Empty);
        }
        if start0 >= total {
            return Err(RangeError::StartOutOfRange {
                start: start0 + 1,
                total,
            });
        }

        let clamped = end0 > total;
        if clamped {
            warn!(
                end = end0,
                total, "End index is greater than the total number of images. Downloading up to {}", total
            );
        }
        Ok(Self {
            start0,
            end0: end0.min(total),
            clamped,
        })
    }

    pub fn len(&self) -> usize {
        self.end0.saturating_sub(self.start0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
