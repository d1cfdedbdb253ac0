//! Structured XML export, rekordbox collection style.
//!
//! Tracks are listed as `TRACK` entries in a `COLLECTION`, each carrying a
//! `POSITION_MARK` pair for the mix-in and mix-out cues, plus a `PLAYLISTS`
//! node referencing them in set order.

use crate::model::TrackFeatures;
use std::fmt::Write;

/// Render the playlist as a rekordbox-style XML document.
pub fn render(name: &str, tracks: &[TrackFeatures]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<DJ_PLAYLISTS Version=\"1.0.0\">\n");
    let _ = writeln!(
        out,
        "  <PRODUCT Name=\"{}\" Version=\"{}\"/>",
        crate::APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    let _ = writeln!(out, "  <COLLECTION Entries=\"{}\">", tracks.len());

    for (i, track) in tracks.iter().enumerate() {
        let _ = writeln!(
            out,
            "    <TRACK TrackID=\"{id}\" Location=\"{location}\" Name=\"{title}\" \
             Artist=\"{artist}\" Genre=\"{genre}\" TotalTime=\"{total}\" \
             AverageBpm=\"{bpm:.2}\" Tonality=\"{tonality}\">",
            id = i + 1,
            location = location_uri(track),
            title = escape(&track.title),
            artist = escape(&track.artist),
            genre = escape(&track.genre),
            total = track.duration_s.round() as u64,
            bpm = track.bpm,
            tonality = track.camelot.musical_name(),
        );
        let _ = writeln!(
            out,
            "      <POSITION_MARK Name=\"MIX IN\" Type=\"0\" Start=\"{:.6}\" Num=\"0\"/>",
            track.mix_in_s
        );
        let _ = writeln!(
            out,
            "      <POSITION_MARK Name=\"MIX OUT\" Type=\"0\" Start=\"{:.6}\" Num=\"1\"/>",
            track.mix_out_s
        );
        out.push_str("    </TRACK>\n");
    }

    out.push_str("  </COLLECTION>\n");
    out.push_str("  <PLAYLISTS>\n");
    let _ = writeln!(
        out,
        "    <NODE Type=\"1\" Name=\"{}\" Entries=\"{}\">",
        escape(name),
        tracks.len()
    );
    for i in 0..tracks.len() {
        let _ = writeln!(out, "      <TRACK Key=\"{}\"/>", i + 1);
    }
    out.push_str("    </NODE>\n");
    out.push_str("  </PLAYLISTS>\n");
    out.push_str("</DJ_PLAYLISTS>\n");
    out
}

/// `file://localhost` URI with a percent-encoded absolute path.
fn location_uri(track: &TrackFeatures) -> String {
    let path = track.path.to_string_lossy();
    let mut encoded = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                encoded.push(byte as char)
            }
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    format!("file://localhost{encoded}")
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
