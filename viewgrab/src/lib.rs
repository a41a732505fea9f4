//! viewgrab - Sequential image downloader for an authenticated archive viewer
//!
//! This library fetches the image list embedded in a viewer page and downloads
//! a range of its images one by one, logging in again, following the viewer's
//! internal redirects, and (when allowed) activating a paid subscription as
//! the server demands.
//!
//! The pieces compose as follows:
//!
//! - [`session`] holds endpoints, credentials, headers, cookies and proxies
//! - [`http`] is the transport seam ([`http::HttpClient`])
//! - [`auth`] and [`entitlement`] restore access when the server withdraws it
//! - [`fetch`] drives one URL to a final outcome within a retry budget
//! - [`index`] extracts the image list, [`range`] selects part of it
//! - [`download`] and [`writer`] fetch and store the range in order
//! - [`job`] ties a whole run together
//! - [`config`] and [`logging`] cover the ambient setup

pub mod auth;
pub mod config;
pub mod download;
pub mod entitlement;
pub mod fetch;
pub mod http;
pub mod index;
pub mod job;
pub mod logging;
pub mod range;
pub mod session;
pub mod writer;

pub use download::{DownloadError, Pacing, RangeOutcome, SequentialDownloader};
pub use fetch::{FetchEngine, FetchFailure, FetchOutcome};
pub use job::{run_job, JobReport, JobSpec};
pub use session::SessionContext;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
