//! Pairwise transition compatibility scoring.
//!
//! `pair_score(a, b)` rates how well track B follows track A on a 0-100
//! scale, as a weighted blend of harmonic distance on the Camelot wheel,
//! BPM delta, energy direction, bass continuity, and genre affinity.

use crate::camelot::CamelotKey;
use crate::model::TrackFeatures;

/// Intended energy movement at a playlist position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyDirection {
    Up,
    Down,
    /// No preference; the energy term becomes a constant and stops
    /// influencing candidate choice.
    Neutral,
}

/// Scoring knobs, fixed per sequencing run (strictness may vary per
/// position for the adaptive strategies).
#[derive(Debug, Clone, Copy)]
pub struct CompatParams {
    pub bpm_tolerance: f64,
    /// Harmonic strictness 1..=10; scales the harmonic weight.
    pub strictness: f64,
    /// Genre term weight factor in [0, 1].
    pub genre_weight: f64,
    pub allow_experimental: bool,
}

/// A scored transition, with the sub-scores the quality metrics need.
#[derive(Debug, Clone, Copy)]
pub struct PairScore {
    pub total: f64,
    pub harmonic: f64,
    pub bpm: f64,
    pub energy: f64,
    pub bass: f64,
    pub genre: f64,
}

/// Score the ordered transition A -> B.
pub fn pair_score(
    a: &TrackFeatures,
    b: &TrackFeatures,
    direction: EnergyDirection,
    params: &CompatParams,
) -> PairScore {
    let harmonic = harmonic_score(a.camelot, b.camelot, params.allow_experimental);
    let bpm = bpm_score((a.bpm - b.bpm).abs(), params.bpm_tolerance);
    let energy = energy_direction_score(b.energy - a.energy, direction);
    let bass = (100.0 - 100.0 * (a.bass_intensity - b.bass_intensity).abs()).max(0.0);
    let genre = genre_score(&a.genre, &b.genre);

    let w = weights(params);
    let total = harmonic * w[0] + bpm * w[1] + energy * w[2] + bass * w[3] + genre * w[4];

    PairScore {
        total,
        harmonic,
        bpm,
        energy,
        bass,
        genre,
    }
}

/// Factor weights [harmonic, bpm, energy, bass, genre], normalized to sum 1.
///
/// Strictness raises the harmonic weight from its 0.35 base by 0.05 per
/// point; the excess comes out of the 0.30 BPM weight, floored at zero.
fn weights(params: &CompatParams) -> [f64; 5] {
    let excess = 0.05 * params.strictness;
    let mut w = [
        0.35 + excess,
        (0.30 - excess).max(0.0),
        0.15,
        0.10,
        params.genre_weight.clamp(0.0, 1.0) * 0.10,
    ];
    let sum: f64 = w.iter().sum();
    for v in w.iter_mut() {
        *v /= sum;
    }
    w
}

/// Harmonic tier table over the Camelot wheel.
pub fn harmonic_score(a: CamelotKey, b: CamelotKey, allow_experimental: bool) -> f64 {
    let experimental = if allow_experimental { 20.0 } else { 0.0 };
    if a == b {
        return 100.0;
    }
    if a.number == b.number {
        // Relative major/minor.
        return 95.0;
    }
    if a.letter == b.letter {
        match a.wheel_distance(b) {
            1 => 90.0,
            2 => 70.0,
            3 => 40.0,
            _ => experimental,
        }
    } else {
        experimental
    }
}

/// 100 inside half the tolerance, linear to 0 at twice the tolerance.
fn bpm_score(delta: f64, tolerance: f64) -> f64 {
    let tolerance = tolerance.max(f64::EPSILON);
    if delta <= tolerance / 2.0 {
        100.0
    } else if delta >= 2.0 * tolerance {
        0.0
    } else {
        100.0 * (2.0 * tolerance - delta) / (1.5 * tolerance)
    }
}

fn energy_direction_score(delta: f64, direction: EnergyDirection) -> f64 {
    const EPS: f64 = 1e-9;
    match direction {
        EnergyDirection::Neutral => 50.0,
        EnergyDirection::Up => {
            if delta > EPS {
                100.0
            } else if delta >= -EPS {
                50.0
            } else {
                0.0
            }
        }
        EnergyDirection::Down => {
            if delta < -EPS {
                100.0
            } else if delta <= EPS {
                50.0
            } else {
                0.0
            }
        }
    }
}

/// Families of genres that blend acceptably even when the labels differ.
/// The table contents are a judgment call, not canon; equality always
/// outranks family membership.
const GENRE_FAMILIES: &[&[&str]] = &[
    &[
        "house",
        "deep house",
        "tech house",
        "progressive house",
        "electro house",
        "funky house",
        "afro house",
    ],
    &[
        "techno",
        "minimal",
        "minimal techno",
        "hard techno",
        "detroit techno",
        "acid techno",
        "melodic techno",
    ],
    &[
        "trance",
        "progressive trance",
        "uplifting trance",
        "psytrance",
        "goa trance",
    ],
    &[
        "drum & bass",
        "drum and bass",
        "dnb",
        "jungle",
        "liquid funk",
        "neurofunk",
    ],
    &["hip-hop", "hip hop", "rap", "trap", "grime"],
    &[
        "ambient",
        "downtempo",
        "chillout",
        "trip-hop",
        "trip hop",
        "lounge",
    ],
];

pub fn normalize_genre(genre: &str) -> String {
    genre.trim().to_lowercase()
}

fn genre_score(a: &str, b: &str) -> f64 {
    let a = normalize_genre(a);
    let b = normalize_genre(b);
    if a == b {
        return 100.0;
    }
    let family_of = |g: &str| {
        GENRE_FAMILIES
            .iter()
            .position(|family| family.contains(&g))
    };
    match (family_of(&a), family_of(&b)) {
        (Some(fa), Some(fb)) if fa == fb => 60.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::track;

    fn params() -> CompatParams {
        CompatParams {
            bpm_tolerance: 6.0,
            strictness: 5.0,
            genre_weight: 0.5,
            allow_experimental: false,
        }
    }

    fn key(code: &str) -> CamelotKey {
        code.parse().unwrap()
    }

    #[test]
    fn test_harmonic_tiers() {
        assert_eq!(harmonic_score(key("8A"), key("8A"), false), 100.0);
        assert_eq!(harmonic_score(key("8A"), key("8B"), false), 95.0);
        assert_eq!(harmonic_score(key("8A"), key("9A"), false), 90.0);
        assert_eq!(harmonic_score(key("8A"), key("7A"), false), 90.0);
        assert_eq!(harmonic_score(key("8A"), key("10A"), false), 70.0);
        assert_eq!(harmonic_score(key("8A"), key("11A"), false), 40.0);
        assert_eq!(harmonic_score(key("8A"), key("2A"), false), 0.0);
        assert_eq!(harmonic_score(key("8A"), key("2A"), true), 20.0);
        // Cross-letter neighbors are experimental territory.
        assert_eq!(harmonic_score(key("8A"), key("9B"), false), 0.0);
        assert_eq!(harmonic_score(key("8A"), key("9B"), true), 20.0);
        // Wheel wraps: 12 and 1 are adjacent.
        assert_eq!(harmonic_score(key("12A"), key("1A"), false), 90.0);
    }

    #[test]
    fn test_bpm_score_shape() {
        assert_eq!(bpm_score(0.0, 6.0), 100.0);
        assert_eq!(bpm_score(3.0, 6.0), 100.0);
        assert_eq!(bpm_score(12.0, 6.0), 0.0);
        assert_eq!(bpm_score(20.0, 6.0), 0.0);
        // Midpoint of the falloff span [3, 12] scores 50.
        assert!((bpm_score(7.5, 6.0) - 50.0).abs() < 1e-9);
        // Monotone decreasing across the span.
        assert!(bpm_score(4.0, 6.0) > bpm_score(8.0, 6.0));
    }

    #[test]
    fn test_energy_direction_score() {
        assert_eq!(energy_direction_score(0.2, EnergyDirection::Up), 100.0);
        assert_eq!(energy_direction_score(-0.2, EnergyDirection::Up), 0.0);
        assert_eq!(energy_direction_score(0.0, EnergyDirection::Up), 50.0);
        assert_eq!(energy_direction_score(-0.2, EnergyDirection::Down), 100.0);
        assert_eq!(energy_direction_score(0.2, EnergyDirection::Down), 0.0);
        assert_eq!(energy_direction_score(0.3, EnergyDirection::Neutral), 50.0);
    }

    #[test]
    fn test_genre_scoring() {
        assert_eq!(genre_score("Techno", " techno "), 100.0);
        assert_eq!(genre_score("deep house", "Tech House"), 60.0);
        assert_eq!(genre_score("techno", "trance"), 0.0);
        assert_eq!(genre_score("techno", "house"), 0.0);
        assert_eq!(genre_score("Unknown", "Unknown"), 100.0);
    }

    #[test]
    fn test_weights_normalize_to_one() {
        for strictness in [1.0, 5.0, 10.0] {
            for genre_weight in [0.0, 0.5, 1.0] {
                let w = weights(&CompatParams {
                    bpm_tolerance: 6.0,
                    strictness,
                    genre_weight,
                    allow_experimental: false,
                });
                let sum: f64 = w.iter().sum();
                assert!((sum - 1.0).abs() < 1e-9);
                assert!(w.iter().all(|&v| v >= 0.0));
            }
        }
    }

    #[test]
    fn test_strictness_moves_weight_from_bpm_to_harmonic() {
        let loose = weights(&CompatParams {
            strictness: 1.0,
            ..params()
        });
        let strict = weights(&CompatParams {
            strictness: 10.0,
            ..params()
        });
        assert!(strict[0] > loose[0], "harmonic weight grows");
        assert!(strict[1] < loose[1], "bpm weight shrinks");
        // Past strictness 6 the BPM weight is exhausted, never negative.
        assert_eq!(
            weights(&CompatParams {
                strictness: 10.0,
                ..params()
            })[1],
            0.0
        );
    }

    #[test]
    fn test_pair_score_range_and_ideal_pair() {
        let a = track("a.wav", "8A", 128.0, 0.5);
        let b = track("b.wav", "8A", 128.0, 0.5);
        let score = pair_score(&a, &b, EnergyDirection::Neutral, &params());
        assert!(score.total <= 100.0);
        // Identical key/BPM/bass: only the neutral energy term (50) and the
        // genre term keep it off 100.
        assert!(score.total > 85.0, "got {}", score.total);
        assert_eq!(score.harmonic, 100.0);
        assert_eq!(score.bpm, 100.0);
    }

    #[test]
    fn test_pair_score_prefers_closer_keys() {
        let a = track("a.wav", "8A", 128.0, 0.5);
        let near = track("b.wav", "9A", 128.0, 0.5);
        let far = track("c.wav", "2A", 128.0, 0.5);
        let p = params();
        let s_near = pair_score(&a, &near, EnergyDirection::Neutral, &p);
        let s_far = pair_score(&a, &far, EnergyDirection::Neutral, &p);
        assert!(s_near.total > s_far.total);
    }
}
