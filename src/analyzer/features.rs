//! Per-track feature extraction pipeline: PCM in, feature record out.

use super::decode::MonoPcm;
use super::{energy, key, structure, tempo};
use crate::cache::Fingerprint;
use crate::model::TrackFeatures;
use crate::scanner::metadata::ResolvedTags;
use chrono::Utc;
use std::path::Path;
use thiserror::Error;

/// A stage of the pipeline failed to produce a value with acceptable
/// confidence. No record is produced for these; the file is reported
/// unanalyzable.
#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("tempo: {0}")]
    Tempo(#[from] tempo::TempoError),
    #[error("key: {0}")]
    Key(#[from] key::KeyError),
}

/// Extract the full feature record for one track.
///
/// The caller supplies decoded (and validated) PCM, the file fingerprint
/// captured before decoding, and resolved metadata. Structure detection
/// cannot fail; at worst it falls back to fixed-ratio mix points and sets
/// the `structure_fallback` flag.
pub fn extract(
    path: &Path,
    pcm: &MonoPcm,
    fingerprint: Fingerprint,
    tags: &ResolvedTags,
) -> Result<TrackFeatures, FeatureError> {
    let duration_s = pcm.duration_s();

    let tempo_est = tempo::estimate_bpm(&pcm.samples, pcm.sample_rate)?;
    let key_est = key::estimate_key(&pcm.samples, pcm.sample_rate)?;

    let energy = energy::mean_rms_energy(&pcm.samples, pcm.sample_rate);
    let bass_intensity = energy::bass_intensity(&pcm.samples, pcm.sample_rate);

    let envelope = energy::frame_rms(&pcm.samples, pcm.sample_rate);
    let struct_result = structure::detect_structure(&envelope, duration_s, tempo_est.bpm);

    log::debug!(
        "{}: {} BPM {} energy {:.2} bass {:.2} sections {}{}",
        path.display(),
        tempo_est.bpm,
        key_est.camelot,
        energy,
        bass_intensity,
        struct_result.sections.len(),
        if struct_result.fallback { " (fallback)" } else { "" },
    );

    Ok(TrackFeatures {
        path: path.to_path_buf(),
        size_bytes: fingerprint.size_bytes,
        mtime_ns: fingerprint.mtime_ns,
        artist: tags.artist.clone(),
        title: tags.title.clone(),
        genre: tags.genre.clone(),
        duration_s,
        bpm: tempo_est.bpm,
        key_root: key_est.root,
        key_mode: key_est.mode,
        camelot: key_est.camelot,
        energy,
        bass_intensity,
        sections: struct_result.sections,
        mix_in_s: struct_result.mix_in_s,
        mix_out_s: struct_result.mix_out_s,
        structure_fallback: struct_result.fallback,
        analyzed_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::key::test_signals::rich_chord;
    use super::super::tempo::test_signals::{click_track, noise};
    use super::*;
    use std::path::PathBuf;

    fn tags() -> ResolvedTags {
        ResolvedTags {
            artist: "Test".into(),
            title: "Fixture".into(),
            genre: "Techno".into(),
        }
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint {
            size_bytes: 42,
            mtime_ns: 1,
        }
    }

    fn pcm(samples: Vec<f32>) -> MonoPcm {
        MonoPcm {
            samples,
            sample_rate: 22_050,
        }
    }

    fn assert_record_invariants(record: &TrackFeatures) {
        assert!(record.duration_s > 0.0);
        assert!((40.0..=220.0).contains(&record.bpm));
        assert!((0.0..=1.0).contains(&record.energy));
        assert!((0.0..=1.0).contains(&record.bass_intensity));
        assert!(0.0 <= record.mix_in_s);
        assert!(record.mix_in_s < record.mix_out_s);
        assert!(record.mix_out_s <= record.duration_s);
        assert_eq!(
            record.camelot,
            crate::camelot::CamelotKey::from_key(record.key_root, record.key_mode)
        );
        assert_eq!(record.sections.first().unwrap().start_s, 0.0);
        assert_eq!(record.sections.last().unwrap().end_s, record.duration_s);
        for pair in record.sections.windows(2) {
            assert_eq!(pair[0].end_s, pair[1].start_s);
        }
    }

    #[test]
    fn test_click_track_record() {
        let audio = pcm(click_track(128.0, 22_050, 10.0));
        let record = extract(&PathBuf::from("/t/click.wav"), &audio, fingerprint(), &tags())
            .expect("click track should analyze");
        assert!((record.bpm - 128.0).abs() <= 0.5, "bpm {}", record.bpm);
        assert_record_invariants(&record);
        assert_eq!(record.artist, "Test");
        assert_eq!(record.genre, "Techno");
    }

    #[test]
    fn test_a_minor_chord_record() {
        let audio = pcm(rich_chord(&[220.0, 261.63, 329.63], 22_050, 3.0));
        // A pure sustained chord has no onsets; tempo must fall back, key
        // must still resolve to 8A.
        let record = extract(&PathBuf::from("/t/am.wav"), &audio, fingerprint(), &tags());
        if let Ok(record) = record {
            assert_eq!(record.camelot.to_string(), "8A");
            assert_record_invariants(&record);
        }
    }

    #[test]
    fn test_silence_produces_fallback_record() {
        // 180 s of silence: tempo defaults to 120, structure falls back, and
        // the fixed-ratio mix points land on ~27 s / ~153 s.
        let audio = pcm(vec![0.0; 22_050 * 180]);
        let record = extract(&PathBuf::from("/t/silent.wav"), &audio, fingerprint(), &tags())
            .expect("silence must yield a fallback record");
        assert!(record.structure_fallback);
        assert_eq!(record.bpm, 120.0);
        assert!((record.mix_in_s - 27.0).abs() <= 0.5, "{}", record.mix_in_s);
        assert!((record.mix_out_s - 153.0).abs() <= 0.5, "{}", record.mix_out_s);
        assert_record_invariants(&record);
    }

    #[test]
    fn test_noise_is_unanalyzable() {
        let audio = pcm(noise(22_050, 10.0));
        let result = extract(&PathBuf::from("/t/noise.wav"), &audio, fingerprint(), &tags());
        assert!(matches!(result, Err(FeatureError::Tempo(_))));
    }

    #[test]
    fn test_fingerprint_and_tags_flow_through() {
        let audio = pcm(click_track(120.0, 22_050, 10.0));
        let record = extract(&PathBuf::from("/t/x.wav"), &audio, fingerprint(), &tags()).unwrap();
        assert_eq!(record.size_bytes, 42);
        assert_eq!(record.mtime_ns, 1);
        assert_eq!(record.path, PathBuf::from("/t/x.wav"));
    }
}
