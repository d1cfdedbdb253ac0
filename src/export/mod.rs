//! Playlist export: extended M3U and rekordbox-style XML.

pub mod m3u;
pub mod xml;

use crate::model::TrackFeatures;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot infer export format from extension: {0}")]
    UnknownFormat(String),
}

/// Write `tracks` to `path`, picking the format from the extension
/// (`.m3u`/`.m3u8` or `.xml`).
pub fn export_to_path(path: &Path, name: &str, tracks: &[TrackFeatures]) -> Result<(), ExportError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let content = match ext.as_str() {
        "m3u" | "m3u8" => m3u::render(name, tracks),
        "xml" => xml::render(name, tracks),
        other => return Err(ExportError::UnknownFormat(other.to_string())),
    };
    std::fs::write(path, content)?;
    Ok(())
}
