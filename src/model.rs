//! Track feature records: the unit of exchange between the analyzer, the
//! cache, and the sequencer.

use crate::camelot::{CamelotKey, KeyMode, PitchClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Structural section label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionLabel {
    Intro,
    Verse,
    Breakdown,
    Drop,
    Outro,
}

impl SectionLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::Verse => "verse",
            Self::Breakdown => "breakdown",
            Self::Drop => "drop",
            Self::Outro => "outro",
        }
    }
}

/// One structural section of a track. Sections are contiguous and cover the
/// whole track: `sections[i].end_s == sections[i+1].start_s`, the first
/// section starts at 0 and the last ends at the track duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub label: SectionLabel,
    pub start_s: f64,
    pub end_s: f64,
    pub start_bar: u32,
    pub end_bar: u32,
    pub avg_energy: f64,
}

/// Full feature record for one analyzed track.
///
/// Created once by the extraction pipeline, persisted by the cache under the
/// (path, size, mtime) fingerprint, and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFeatures {
    /// Absolute file path; external identity of the record.
    pub path: PathBuf,
    /// File size at analysis time (fingerprint component).
    pub size_bytes: u64,
    /// File mtime in nanoseconds since the epoch (fingerprint component).
    pub mtime_ns: i64,

    pub artist: String,
    pub title: String,
    pub genre: String,

    pub duration_s: f64,
    /// Detected tempo, one decimal, within [40, 220].
    pub bpm: f64,
    pub key_root: PitchClass,
    pub key_mode: KeyMode,
    pub camelot: CamelotKey,
    /// Trimmed mean frame RMS, in [0, 1].
    pub energy: f64,
    /// Mean fraction of spectral magnitude in the 20-200 Hz band, in [0, 1].
    pub bass_intensity: f64,

    pub sections: Vec<Section>,
    /// First phrase boundary suitable for mixing in, seconds.
    pub mix_in_s: f64,
    /// Last phrase boundary suitable for mixing out, seconds.
    pub mix_out_s: f64,
    /// True when section detection fell back to the fixed-ratio mix points.
    pub structure_fallback: bool,

    pub analyzed_at: DateTime<Utc>,
}

impl TrackFeatures {
    /// Seconds per bar at this track's tempo, assuming 4/4.
    pub fn bar_seconds(&self) -> f64 {
        240.0 / self.bpm
    }

    /// Seconds per 16-bar phrase.
    pub fn phrase_seconds(&self) -> f64 {
        16.0 * self.bar_seconds()
    }

    /// File name without directories, for display.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    /// Display label, "Artist - Title".
    pub fn display_label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    /// Minimal valid record for sequencer/export tests.
    pub fn track(path: &str, camelot: &str, bpm: f64, energy: f64) -> TrackFeatures {
        let camelot: CamelotKey = camelot.parse().unwrap();
        let (key_root, key_mode) = camelot.to_key();
        let duration_s = 240.0;
        TrackFeatures {
            path: PathBuf::from(path),
            size_bytes: 1_000_000,
            mtime_ns: 0,
            artist: "Unknown".to_string(),
            title: path.trim_end_matches(".wav").to_string(),
            genre: "Unknown".to_string(),
            duration_s,
            bpm,
            key_root,
            key_mode,
            camelot,
            energy,
            bass_intensity: 0.5,
            sections: vec![
                Section {
                    label: SectionLabel::Intro,
                    start_s: 0.0,
                    end_s: 30.0,
                    start_bar: 0,
                    end_bar: 16,
                    avg_energy: energy * 0.5,
                },
                Section {
                    label: SectionLabel::Verse,
                    start_s: 30.0,
                    end_s: 210.0,
                    start_bar: 16,
                    end_bar: 112,
                    avg_energy: energy,
                },
                Section {
                    label: SectionLabel::Outro,
                    start_s: 210.0,
                    end_s: duration_s,
                    start_bar: 112,
                    end_bar: 128,
                    avg_energy: energy * 0.5,
                },
            ],
            mix_in_s: 30.0,
            mix_out_s: 210.0,
            structure_fallback: false,
            analyzed_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }
}
