//! Playlist quality metrics.

use super::compat::{normalize_genre, pair_score, CompatParams};
use super::{direction_for, phase_counts, SequencerParams, Strategy};
use crate::model::TrackFeatures;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistMetrics {
    /// Mean adjacent-pair compatibility. `None` (serialized as null) when
    /// the playlist has fewer than two tracks: undefined, not NaN.
    pub mean_compat: Option<f64>,
    /// Fraction of adjacent pairs whose harmonic sub-score is at least 70.
    pub harmonic_hit_rate: f64,
    pub bpm_jump_max: f64,
    pub bpm_jump_p95: f64,
    pub bpm_jump_mean: f64,
    /// Pearson correlation between the realized energy curve and the
    /// strategy's intended shape; 0 when either side is flat.
    pub energy_correlation: f64,
    /// Adjacent pairs with differing (normalized) genres.
    pub genre_switches: u32,
    /// BPM-window widenings logged while sequencing.
    pub constraint_relaxations: u32,
}

impl PlaylistMetrics {
    pub fn zero() -> Self {
        Self {
            mean_compat: None,
            harmonic_hit_rate: 0.0,
            bpm_jump_max: 0.0,
            bpm_jump_p95: 0.0,
            bpm_jump_mean: 0.0,
            energy_correlation: 0.0,
            genre_switches: 0,
            constraint_relaxations: 0,
        }
    }
}

pub fn compute(
    playlist: &[TrackFeatures],
    strategy: Strategy,
    params: &SequencerParams,
    constraint_relaxations: u32,
) -> PlaylistMetrics {
    let n = playlist.len();
    if n < 2 {
        return PlaylistMetrics {
            constraint_relaxations,
            ..PlaylistMetrics::zero()
        };
    }

    let cp = CompatParams {
        bpm_tolerance: params.bpm_tolerance,
        strictness: f64::from(params.harmonic_strictness),
        genre_weight: params.genre_weight,
        allow_experimental: params.allow_experimental,
    };

    let mut totals = Vec::with_capacity(n - 1);
    let mut harmonic_hits = 0usize;
    let mut jumps = Vec::with_capacity(n - 1);
    let mut genre_switches = 0u32;

    for i in 0..n - 1 {
        let a = &playlist[i];
        let b = &playlist[i + 1];
        let direction = direction_for(strategy, i + 1, n, params);
        let score = pair_score(a, b, direction, &cp);
        totals.push(score.total);
        if score.harmonic >= 70.0 {
            harmonic_hits += 1;
        }
        jumps.push((a.bpm - b.bpm).abs());
        if normalize_genre(&a.genre) != normalize_genre(&b.genre) {
            genre_switches += 1;
        }
    }

    let realized: Vec<f64> = playlist.iter().map(|t| t.energy).collect();
    let intended = intended_curve(strategy, n, params);

    PlaylistMetrics {
        mean_compat: Some(totals.iter().sum::<f64>() / totals.len() as f64),
        harmonic_hit_rate: harmonic_hits as f64 / (n - 1) as f64,
        bpm_jump_max: jumps.iter().cloned().fold(0.0, f64::max),
        bpm_jump_p95: percentile(&jumps, 0.95),
        bpm_jump_mean: jumps.iter().sum::<f64>() / jumps.len() as f64,
        energy_correlation: pearson(&realized, &intended),
        genre_switches,
        constraint_relaxations,
    }
}

/// The energy shape a strategy is trying to realize, sampled at each
/// playlist position. Strategies with no energy intent are flat (their
/// correlation is reported as 0).
pub fn intended_curve(strategy: Strategy, n: usize, params: &SequencerParams) -> Vec<f64> {
    let span = (n.saturating_sub(1)).max(1) as f64;
    match strategy {
        Strategy::WarmUp => (0..n).map(|i| i as f64 / span).collect(),
        Strategy::CoolDown => (0..n).map(|i| 1.0 - i as f64 / span).collect(),
        Strategy::PeakTimeEnhanced => {
            let apex = (span * params.peak_position / 100.0).round().max(1.0);
            (0..n)
                .map(|i| {
                    let i = i as f64;
                    if i <= apex {
                        i / apex
                    } else {
                        1.0 - (i - apex) / (span - apex).max(1.0)
                    }
                })
                .collect()
        }
        Strategy::EmotionalJourney => {
            // Rises through intro/build/peak, releases through the cool-down.
            let apex = phase_counts(n)[..3].iter().sum::<usize>().max(1) as f64;
            (0..n)
                .map(|i| {
                    let i = i as f64;
                    if i <= apex {
                        i / apex
                    } else {
                        1.0 - (i - apex) / (span - apex).max(1.0)
                    }
                })
                .collect()
        }
        Strategy::EnergyWaveEnhanced => {
            (0..n).map(|i| if i % 2 == 0 { 0.0 } else { 1.0 }).collect()
        }
        _ => vec![0.5; n],
    }
}

/// Nearest-rank percentile of an unsorted sample.
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

/// Pearson correlation; 0 when either series has no variance.
fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let n_f = n as f64;
    let mean_a = a[..n].iter().sum::<f64>() / n_f;
    let mean_b = b[..n].iter().sum::<f64>() / n_f;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        cov / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::track;

    fn params() -> SequencerParams {
        SequencerParams::default()
    }

    #[test]
    fn test_zero_metrics() {
        let m = PlaylistMetrics::zero();
        assert_eq!(m.mean_compat, None);
        assert_eq!(m.bpm_jump_max, 0.0);
        assert_eq!(m.genre_switches, 0);
    }

    #[test]
    fn test_single_track_mean_compat_is_null() {
        let playlist = vec![track("a.wav", "8A", 128.0, 0.5)];
        let m = compute(&playlist, Strategy::HarmonicFlow, &params(), 0);
        assert_eq!(m.mean_compat, None);
        let json = serde_json::to_value(&m).unwrap();
        assert!(json["mean_compat"].is_null(), "sentinel must serialize as null");
    }

    #[test]
    fn test_bpm_jump_stats() {
        let playlist = vec![
            track("a.wav", "8A", 120.0, 0.5),
            track("b.wav", "8A", 124.0, 0.5),
            track("c.wav", "8A", 134.0, 0.5),
        ];
        let m = compute(&playlist, Strategy::HarmonicFlow, &params(), 0);
        assert_eq!(m.bpm_jump_max, 10.0);
        assert_eq!(m.bpm_jump_mean, 7.0);
        assert_eq!(m.bpm_jump_p95, 10.0);
    }

    #[test]
    fn test_harmonic_hit_rate() {
        let playlist = vec![
            track("a.wav", "8A", 128.0, 0.5),
            track("b.wav", "9A", 128.0, 0.5), // 90
            track("c.wav", "11A", 128.0, 0.5), // 70
            track("d.wav", "5B", 128.0, 0.5), // miss
        ];
        let m = compute(&playlist, Strategy::HarmonicFlow, &params(), 0);
        assert!((m.harmonic_hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_energy_correlation_tracks_warm_up_shape() {
        let rising = vec![
            track("a.wav", "8A", 120.0, 0.2),
            track("b.wav", "8A", 122.0, 0.4),
            track("c.wav", "8A", 124.0, 0.6),
            track("d.wav", "8A", 126.0, 0.8),
        ];
        let m = compute(&rising, Strategy::WarmUp, &params(), 0);
        assert!(m.energy_correlation > 0.99, "got {}", m.energy_correlation);

        let m = compute(&rising, Strategy::CoolDown, &params(), 0);
        assert!(m.energy_correlation < -0.99, "got {}", m.energy_correlation);
    }

    #[test]
    fn test_flat_intent_reports_zero_correlation() {
        let playlist = vec![
            track("a.wav", "8A", 120.0, 0.2),
            track("b.wav", "8A", 122.0, 0.8),
        ];
        let m = compute(&playlist, Strategy::HarmonicFlow, &params(), 0);
        assert_eq!(m.energy_correlation, 0.0);
    }

    #[test]
    fn test_genre_switches() {
        let mut playlist = vec![
            track("a.wav", "8A", 128.0, 0.5),
            track("b.wav", "8A", 128.0, 0.5),
            track("c.wav", "8A", 128.0, 0.5),
        ];
        playlist[0].genre = "Techno".into();
        playlist[1].genre = "techno ".into(); // same after normalization
        playlist[2].genre = "House".into();
        let m = compute(&playlist, Strategy::HarmonicFlow, &params(), 0);
        assert_eq!(m.genre_switches, 1);
    }

    #[test]
    fn test_relaxations_pass_through() {
        let playlist = vec![track("a.wav", "8A", 128.0, 0.5)];
        let m = compute(&playlist, Strategy::HarmonicFlow, &params(), 3);
        assert_eq!(m.constraint_relaxations, 3);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&values, 0.95), 95.0);
        assert_eq!(percentile(&[4.0], 0.95), 4.0);
        assert_eq!(percentile(&[], 0.95), 0.0);
    }

    #[test]
    fn test_intended_curve_shapes() {
        let p = params();
        let warm = intended_curve(Strategy::WarmUp, 5, &p);
        assert_eq!(warm.first(), Some(&0.0));
        assert_eq!(warm.last(), Some(&1.0));

        let peak = intended_curve(Strategy::PeakTimeEnhanced, 11, &p);
        let apex = peak
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        // Peak position 60% of 10 -> position 6.
        assert_eq!(apex, 6);

        let wave = intended_curve(Strategy::EnergyWaveEnhanced, 4, &p);
        assert_eq!(wave, vec![0.0, 1.0, 0.0, 1.0]);
    }
}
