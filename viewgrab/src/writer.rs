//! Persistence of downloaded images.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Extension used when the content type is missing or unknown.
pub const FALLBACK_EXTENSION: &str = ".bin";

/// Stores one downloaded resource.
pub trait FileWriter {
    /// Write `bytes` into `dir` under `stem` plus an extension derived from
    /// `content_type`. Returns the final path.
    fn write(
        &self,
        dir: &Path,
        stem: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> io::Result<PathBuf>;
}

/// File extension for a `Content-Type` value, parameters ignored.
///
/// The viewer serves e.g. `image/jpeg;charset=UTF-8`.
pub fn extension_for(content_type: Option<&str>) -> &'static str {
    let media_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|mt| mt.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match media_type.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/tiff" => ".tif",
        "image/bmp" | "image/x-ms-bmp" => ".bmp",
        "image/svg+xml" => ".svg",
        "application/pdf" => ".pdf",
        _ => FALLBACK_EXTENSION,
    }
}

/// Zero-padded 1-based file stem.
pub fn sequence_stem(number: usize, width: usize) -> String {
    format!("{:0width$}", number, width = width)
}

/// Writes files to disk through a temporary `.part` file and a rename.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskWriter;

impl FileWriter for DiskWriter {
    fn write(
        &self,
        dir: &Path,
        stem: &str,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> io::Result<PathBuf> {
        let path = dir.join(format!("{}{}", stem, extension_for(content_type)));
        let partial = dir.join(format!("{}.part", stem));

        fs::write(&partial, bytes)?;
        if let Err(e) = fs::rename(&partial, &path) {
            fs::remove_file(&partial).ok();
            return Err(e);
        }
        Ok(path)
    }
}
