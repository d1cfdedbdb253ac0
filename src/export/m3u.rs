//! Extended M3U with mix-point annotations.
//!
//! One `#EXTINF` / `#MIXPOINT` / path triple per track, blank line between
//! triples, UTF-8, LF line endings. `parse` accepts what `render` emits so
//! a written playlist reads back identically.

use crate::model::TrackFeatures;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum M3uError {
    #[error("missing #EXTM3U header")]
    MissingHeader,
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// One track entry as read back from an exported playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct M3uEntry {
    pub path: PathBuf,
    pub artist: String,
    pub title: String,
    pub duration_s: u64,
    pub mix_in_s: f64,
    pub mix_out_s: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct M3uPlaylist {
    pub name: String,
    pub entries: Vec<M3uEntry>,
}

/// Render a playlist to M3U text.
pub fn render(name: &str, tracks: &[TrackFeatures]) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXTENC:UTF-8\n");
    out.push_str(&format!("#PLAYLIST:{name}\n"));
    for track in tracks {
        out.push('\n');
        out.push_str(&format!(
            "#EXTINF:{},{} - {}\n",
            track.duration_s.round() as u64,
            track.artist,
            track.title
        ));
        out.push_str(&format!("#MIXPOINT:{},{}\n", track.mix_in_s, track.mix_out_s));
        out.push_str(&format!("{}\n", track.path.display()));
    }
    out
}

/// Parse M3U text produced by [`render`].
pub fn parse(content: &str) -> Result<M3uPlaylist, M3uError> {
    let mut lines = content.lines().enumerate();

    match lines.next() {
        Some((_, "#EXTM3U")) => {}
        _ => return Err(M3uError::MissingHeader),
    }

    let mut name = String::new();
    let mut entries = Vec::new();
    let mut pending: Option<(usize, String, String, u64)> = None; // EXTINF parts
    let mut mix: Option<(f64, f64)> = None;

    for (idx, line) in lines {
        let line_no = idx + 1;
        let line = line.trim_end();
        if line.is_empty() || line == "#EXTENC:UTF-8" {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#PLAYLIST:") {
            name = rest.to_string();
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let (duration, label) = rest.split_once(',').ok_or(M3uError::Malformed {
                line: line_no,
                message: "EXTINF without comma".to_string(),
            })?;
            let duration: u64 = duration.parse().map_err(|_| M3uError::Malformed {
                line: line_no,
                message: format!("bad duration: {duration}"),
            })?;
            let (artist, title) = label.split_once(" - ").ok_or(M3uError::Malformed {
                line: line_no,
                message: "EXTINF label without ' - '".to_string(),
            })?;
            pending = Some((line_no, artist.to_string(), title.to_string(), duration));
        } else if let Some(rest) = line.strip_prefix("#MIXPOINT:") {
            let (mix_in, mix_out) = rest.split_once(',').ok_or(M3uError::Malformed {
                line: line_no,
                message: "MIXPOINT without comma".to_string(),
            })?;
            let parse_f = |s: &str| {
                s.parse::<f64>().map_err(|_| M3uError::Malformed {
                    line: line_no,
                    message: format!("bad mix point: {s}"),
                })
            };
            mix = Some((parse_f(mix_in)?, parse_f(mix_out)?));
        } else if line.starts_with('#') {
            // Unknown directive; tolerated.
            log::debug!("ignoring M3U directive: {line}");
        } else {
            let (_, artist, title, duration_s) = pending.take().ok_or(M3uError::Malformed {
                line: line_no,
                message: "path without preceding #EXTINF".to_string(),
            })?;
            let (mix_in_s, mix_out_s) = mix.take().ok_or(M3uError::Malformed {
                line: line_no,
                message: "path without preceding #MIXPOINT".to_string(),
            })?;
            entries.push(M3uEntry {
                path: PathBuf::from(line),
                artist,
                title,
                duration_s,
                mix_in_s,
                mix_out_s,
            });
        }
    }

    Ok(M3uPlaylist { name, entries })
}
