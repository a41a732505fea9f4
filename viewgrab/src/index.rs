//! Discovery of the image list embedded in the viewer page.
//!
//! The viewer page keeps its image references in a JavaScript array whose
//! name is randomized on every page load:
//!
//! ```text
//! var QXWNRZ = ['a1b2','c3d4', ...];
//! ...
//! curPage = QXWNRZ.length;
//! ```
//!
//! The name is therefore found first, through the `curPage` assignment, and
//! only then is the array itself located and its string literals extracted.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

/// Why no index could be extracted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("couldn't parse the index: no `curPage = <name>.length;` marker")]
    MissingMarker,

    #[error("couldn't parse the list: no array named {name}")]
    MissingArray { name: String },
}

/// Ordered resource references, in display and download order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageIndex {
    references: Vec<String>,
}

impl ImageIndex {
    pub fn new(references: Vec<String>) -> Self {
        Self { references }
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&str> {
        self.references.get(position).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.references.iter().map(String::as_str)
    }

    /// Digit count of the index length, used for zero-padded file names.
    pub fn number_width(&self) -> usize {
        self.references.len().to_string().len()
    }
}

impl From<Vec<String>> for ImageIndex {
    fn from(references: Vec<String>) -> Self {
        Self::new(references)
    }
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"curPage = (\w+)\.length;").expect("valid regex"))
}

fn literal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"'(.*?),?'").expect("valid regex"))
}

/// Extract the image index, reporting why extraction failed.
pub fn try_parse_index(payload: &str) -> Result<ImageIndex, IndexError> {
    let name = marker_pattern()
        .captures(payload)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or(IndexError::MissingMarker)?;
    debug!(name, "Found image array name");

    let array_pattern = Regex::new(&format!(r"(?s)var {} = \[(.*?)\];", regex::escape(name)))
        .map_err(|_| IndexError::MissingArray {
            name: name.to_string(),
        })?;
    let content = array_pattern
        .captures(payload)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| IndexError::MissingArray {
            name: name.to_string(),
        })?;

    let references = literal_pattern()
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();

    Ok(ImageIndex::new(references))
}

/// Extract the image index; any failure yields an empty index.
///
/// An empty index means "stop, nothing to download" to the caller.
pub fn parse_index(payload: &str) -> ImageIndex {
    match try_parse_index(payload) {
        Ok(index) => index,
        Err(e) => {
            warn!("{}", e);
            ImageIndex::default()
        }
    }
}
