//! Playlist sequencing: ten ordering strategies over the compatibility
//! graph.
//!
//! Every strategy picks a deterministic seed and appends one track at a
//! time from the remaining pool. Hard filters only ever widen; the
//! sequencer never fails and never drops a track.

pub mod compat;
pub mod metrics;

use crate::model::TrackFeatures;
use compat::{normalize_genre, pair_score, CompatParams, EnergyDirection};
use metrics::PlaylistMetrics;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

/// The closed set of ordering strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    HarmonicFlow,
    HarmonicFlowEnhanced,
    WarmUp,
    CoolDown,
    PeakTimeEnhanced,
    EnergyWaveEnhanced,
    ConsistentEnhanced,
    GenreFlow,
    EmotionalJourney,
    SmartHarmonic,
}

impl Strategy {
    pub const ALL: [Strategy; 10] = [
        Self::HarmonicFlow,
        Self::HarmonicFlowEnhanced,
        Self::WarmUp,
        Self::CoolDown,
        Self::PeakTimeEnhanced,
        Self::EnergyWaveEnhanced,
        Self::ConsistentEnhanced,
        Self::GenreFlow,
        Self::EmotionalJourney,
        Self::SmartHarmonic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::HarmonicFlow => "harmonic-flow",
            Self::HarmonicFlowEnhanced => "harmonic-flow-enhanced",
            Self::WarmUp => "warm-up",
            Self::CoolDown => "cool-down",
            Self::PeakTimeEnhanced => "peak-time-enhanced",
            Self::EnergyWaveEnhanced => "energy-wave-enhanced",
            Self::ConsistentEnhanced => "consistent-enhanced",
            Self::GenreFlow => "genre-flow",
            Self::EmotionalJourney => "emotional-journey",
            Self::SmartHarmonic => "smart-harmonic",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown strategy: {0}")]
pub struct ParseStrategyError(String);

impl FromStr for Strategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| ParseStrategyError(s.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct SequencerParams {
    pub bpm_tolerance: f64,
    /// Harmonic strictness 1..=10.
    pub harmonic_strictness: u8,
    /// Genre term weight, [0, 1].
    pub genre_weight: f64,
    /// Peak position as a percentage of the playlist, for Peak-Time.
    pub peak_position: f64,
    pub allow_experimental: bool,
}

impl Default for SequencerParams {
    fn default() -> Self {
        Self {
            bpm_tolerance: 6.0,
            harmonic_strictness: 5,
            genre_weight: 0.5,
            peak_position: 60.0,
            allow_experimental: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SequenceResult {
    pub playlist: Vec<TrackFeatures>,
    pub metrics: PlaylistMetrics,
}

/// Order `tracks` under `strategy`. Always returns a permutation of the
/// input; an empty pool yields an empty playlist with zeroed metrics.
pub fn sequence(
    tracks: &[TrackFeatures],
    strategy: Strategy,
    params: &SequencerParams,
) -> SequenceResult {
    if tracks.is_empty() {
        return SequenceResult {
            playlist: Vec::new(),
            metrics: PlaylistMetrics::zero(),
        };
    }

    let (order, relaxations) = match strategy {
        Strategy::WarmUp => (sorted_order(tracks, false), 0),
        Strategy::CoolDown => (sorted_order(tracks, true), 0),
        Strategy::GenreFlow => genre_flow_order(tracks, params),
        Strategy::ConsistentEnhanced => consistent_order(tracks, params),
        _ => greedy_order(tracks, strategy, params),
    };

    let playlist: Vec<TrackFeatures> = order.iter().map(|&i| tracks[i].clone()).collect();
    let metrics = metrics::compute(&playlist, strategy, params, relaxations);
    SequenceResult { playlist, metrics }
}

/// Intended energy direction for the track entering at `position` (1-based
/// slot in the playlist; the seed occupies position 0).
pub(crate) fn direction_for(
    strategy: Strategy,
    position: usize,
    total: usize,
    params: &SequencerParams,
) -> EnergyDirection {
    match strategy {
        Strategy::PeakTimeEnhanced => {
            let peak = (total as f64 * params.peak_position / 100.0).round() as usize;
            if position < peak.max(1) {
                EnergyDirection::Up
            } else {
                EnergyDirection::Down
            }
        }
        Strategy::EnergyWaveEnhanced => {
            if position % 2 == 1 {
                EnergyDirection::Up
            } else {
                EnergyDirection::Down
            }
        }
        Strategy::EmotionalJourney => {
            // 20% intro, 30% build, 25% peak all push upward; the final
            // cool-down quarter releases.
            let cool_start = phase_counts(total)[..3].iter().sum::<usize>();
            if position < cool_start {
                EnergyDirection::Up
            } else {
                EnergyDirection::Down
            }
        }
        _ => EnergyDirection::Neutral,
    }
}

/// Emotional Journey phase sizes by count: 20/30/25/25 with the remainder
/// absorbed by the final phase.
pub(crate) fn phase_counts(total: usize) -> [usize; 4] {
    let intro = (total as f64 * 0.20).floor() as usize;
    let build = (total as f64 * 0.30).floor() as usize;
    let peak = (total as f64 * 0.25).floor() as usize;
    let cool = total.saturating_sub(intro + build + peak);
    [intro, build, peak, cool]
}

/// Harmonic strictness for the transition into `position`. Smart Harmonic
/// decays linearly from 10 to 5 across the playlist so the opening is more
/// conservative than the mid-section.
fn strictness_for(
    strategy: Strategy,
    position: usize,
    total: usize,
    params: &SequencerParams,
) -> f64 {
    match strategy {
        Strategy::SmartHarmonic => {
            let span = (total.saturating_sub(1)).max(1) as f64;
            10.0 - 5.0 * (position as f64 / span)
        }
        _ => f64::from(params.harmonic_strictness),
    }
}

fn compat_params(strictness: f64, params: &SequencerParams) -> CompatParams {
    CompatParams {
        bpm_tolerance: params.bpm_tolerance,
        strictness,
        genre_weight: params.genre_weight,
        allow_experimental: params.allow_experimental,
    }
}

/// Deterministic tie-breaking comparison: higher score first, then
/// lexicographic path.
fn better(
    score: f64,
    idx: usize,
    best: Option<(f64, usize)>,
    tracks: &[TrackFeatures],
) -> bool {
    match best {
        None => true,
        Some((best_score, best_idx)) => match score.partial_cmp(&best_score) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => tracks[idx].path < tracks[best_idx].path,
            _ => false,
        },
    }
}

/// Seed track: Warm-Up starts slowest, Cool-Down fastest, everything else
/// starts from the lowest-energy track. Ties always break on path.
fn seed_index(tracks: &[TrackFeatures], pool: &[usize], strategy: Strategy) -> usize {
    let seed_key = |i: usize| -> (f64, &std::path::PathBuf) {
        let t = &tracks[i];
        let key = match strategy {
            Strategy::WarmUp => t.bpm,
            Strategy::CoolDown => -t.bpm,
            _ => t.energy,
        };
        (key, &t.path)
    };
    *pool
        .iter()
        .min_by(|&&a, &&b| {
            let (ka, pa) = seed_key(a);
            let (kb, pb) = seed_key(b);
            ka.partial_cmp(&kb)
                .unwrap_or(Ordering::Equal)
                .then_with(|| pa.cmp(pb))
        })
        .expect("pool is non-empty")
}

/// Candidates inside the hard BPM window around the previous track. An
/// empty window widens by 1 BPM at a time, emitting a constraint_relaxed
/// event per step, until a candidate exists.
fn windowed_candidates(
    tracks: &[TrackFeatures],
    pool: &[usize],
    prev: usize,
    base_tolerance: f64,
    relaxations: &mut u32,
) -> Vec<usize> {
    let mut window = base_tolerance;
    loop {
        let candidates: Vec<usize> = pool
            .iter()
            .copied()
            .filter(|&i| (tracks[i].bpm - tracks[prev].bpm).abs() <= window)
            .collect();
        if !candidates.is_empty() {
            return candidates;
        }
        window += 1.0;
        *relaxations += 1;
        log::debug!(
            "constraint_relaxed: BPM window widened to {window:.0} around {:.1}",
            tracks[prev].bpm
        );
    }
}

/// Shared greedy core for the flow strategies.
fn greedy_order(
    tracks: &[TrackFeatures],
    strategy: Strategy,
    params: &SequencerParams,
) -> (Vec<usize>, u32) {
    let n = tracks.len();
    let mut pool: Vec<usize> = (0..n).collect();
    let seed = seed_index(tracks, &pool, strategy);
    pool.retain(|&i| i != seed);
    let mut order = vec![seed];
    let mut relaxations = 0u32;

    // One-step lookahead bonus for Harmonic Flow Enhanced: a direction-free
    // pair matrix, computed up front in parallel.
    let lookahead: Option<Vec<Vec<f64>>> = (strategy == Strategy::HarmonicFlowEnhanced).then(|| {
        let cp = compat_params(f64::from(params.harmonic_strictness), params);
        (0..n)
            .into_par_iter()
            .map(|i| {
                (0..n)
                    .map(|j| {
                        if i == j {
                            0.0
                        } else {
                            pair_score(&tracks[i], &tracks[j], EnergyDirection::Neutral, &cp).total
                        }
                    })
                    .collect()
            })
            .collect()
    });

    while !pool.is_empty() {
        let position = order.len();
        let prev = *order.last().expect("seeded");
        let direction = direction_for(strategy, position, n, params);
        let cp = compat_params(strictness_for(strategy, position, n, params), params);

        let candidates = windowed_candidates(tracks, &pool, prev, params.bpm_tolerance, &mut relaxations);

        let mut best: Option<(f64, usize)> = None;
        for &cand in &candidates {
            let mut score = pair_score(&tracks[prev], &tracks[cand], direction, &cp).total;
            if let Some(matrix) = &lookahead {
                let bonus = pool
                    .iter()
                    .filter(|&&x| x != cand)
                    .map(|&x| matrix[cand][x])
                    .fold(f64::NEG_INFINITY, f64::max);
                if bonus.is_finite() {
                    score += 0.5 * bonus;
                }
            }
            if better(score, cand, best, tracks) {
                best = Some((score, cand));
            }
        }

        let (_, chosen) = best.expect("window widening guarantees a candidate");
        pool.retain(|&i| i != chosen);
        order.push(chosen);
    }

    (order, relaxations)
}

/// Warm-Up / Cool-Down: plain sorts on (BPM, energy), ascending or
/// descending, with path as the final deterministic tie-break.
fn sorted_order(tracks: &[TrackFeatures], descending: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..tracks.len()).collect();
    order.sort_by(|&a, &b| {
        let ta = &tracks[a];
        let tb = &tracks[b];
        let cmp = ta
            .bpm
            .partial_cmp(&tb.bpm)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                ta.energy
                    .partial_cmp(&tb.energy)
                    .unwrap_or(Ordering::Equal)
            });
        let cmp = if descending { cmp.reverse() } else { cmp };
        cmp.then_with(|| ta.path.cmp(&tb.path))
    });
    order
}

/// Consistent Enhanced: minimize |dBPM| + |dEnergy| step by step, harmonic
/// sub-score breaking ties, then path.
fn consistent_order(tracks: &[TrackFeatures], params: &SequencerParams) -> (Vec<usize>, u32) {
    let n = tracks.len();
    let mut pool: Vec<usize> = (0..n).collect();
    let seed = seed_index(tracks, &pool, Strategy::ConsistentEnhanced);
    pool.retain(|&i| i != seed);
    let mut order = vec![seed];

    while !pool.is_empty() {
        let prev = *order.last().expect("seeded");
        let mut best: Option<(f64, f64, usize)> = None; // (cost, -harmonic, idx)
        for &cand in &pool {
            let cost = (tracks[prev].bpm - tracks[cand].bpm).abs()
                + (tracks[prev].energy - tracks[cand].energy).abs();
            let harmonic = compat::harmonic_score(
                tracks[prev].camelot,
                tracks[cand].camelot,
                params.allow_experimental,
            );
            let candidate = (cost, -harmonic, cand);
            let wins = match best {
                None => true,
                Some((bc, bh, bi)) => (cost, -harmonic)
                    .partial_cmp(&(bc, bh))
                    .map(|o| match o {
                        Ordering::Less => true,
                        Ordering::Equal => tracks[cand].path < tracks[bi].path,
                        Ordering::Greater => false,
                    })
                    .unwrap_or(false),
            };
            if wins {
                best = Some(candidate);
            }
        }
        let (_, _, chosen) = best.expect("pool non-empty");
        pool.retain(|&i| i != chosen);
        order.push(chosen);
    }

    (order, 0)
}

/// Genre Flow: cluster by genre, order clusters by mean energy, run
/// Harmonic Flow inside each cluster, seeding each next cluster from the
/// best transition out of the previous one.
fn genre_flow_order(tracks: &[TrackFeatures], params: &SequencerParams) -> (Vec<usize>, u32) {
    let mut clusters: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, track) in tracks.iter().enumerate() {
        clusters
            .entry(normalize_genre(&track.genre))
            .or_default()
            .push(i);
    }

    let mut cluster_list: Vec<(String, Vec<usize>)> = clusters.into_iter().collect();
    cluster_list.sort_by(|(name_a, a), (name_b, b)| {
        let mean = |ids: &[usize]| {
            ids.iter().map(|&i| tracks[i].energy).sum::<f64>() / ids.len() as f64
        };
        mean(a)
            .partial_cmp(&mean(b))
            .unwrap_or(Ordering::Equal)
            .then_with(|| name_a.cmp(name_b))
    });

    let cp = compat_params(f64::from(params.harmonic_strictness), params);
    let mut order: Vec<usize> = Vec::with_capacity(tracks.len());
    let mut relaxations = 0u32;

    for (_, mut pool) in cluster_list {
        // Seed: lowest energy for the opening cluster, best transition from
        // the running playlist otherwise.
        let seed = match order.last() {
            None => seed_index(tracks, &pool, Strategy::GenreFlow),
            Some(&last) => {
                let mut best: Option<(f64, usize)> = None;
                for &cand in &pool {
                    let score =
                        pair_score(&tracks[last], &tracks[cand], EnergyDirection::Neutral, &cp)
                            .total;
                    if better(score, cand, best, tracks) {
                        best = Some((score, cand));
                    }
                }
                best.expect("cluster non-empty").1
            }
        };
        pool.retain(|&i| i != seed);
        order.push(seed);

        while !pool.is_empty() {
            let prev = *order.last().expect("seeded");
            let candidates =
                windowed_candidates(tracks, &pool, prev, params.bpm_tolerance, &mut relaxations);
            let mut best: Option<(f64, usize)> = None;
            for &cand in &candidates {
                let score =
                    pair_score(&tracks[prev], &tracks[cand], EnergyDirection::Neutral, &cp).total;
                if better(score, cand, best, tracks) {
                    best = Some((score, cand));
                }
            }
            let (_, chosen) = best.expect("window widening guarantees a candidate");
            pool.retain(|&i| i != chosen);
            order.push(chosen);
        }
    }

    (order, relaxations)
}
