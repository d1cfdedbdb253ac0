//! Section detection and mix-point placement.
//!
//! The 1-second RMS envelope is segmented with penalty-gated recursive
//! binary splitting (a regression tree on the 1-D envelope), segments are
//! labeled by rule, and the mix-in/mix-out points are snapped to 16-bar
//! phrase boundaries around the intro and outro.

use crate::model::{Section, SectionLabel};

/// Minimum segment length in envelope frames (seconds).
const MIN_SEGMENT_FRAMES: usize = 8;

/// Maximum number of segments the splitter will produce.
const MAX_SEGMENTS: usize = 8;

/// A split must remove at least this fraction of the envelope's total
/// squared error to be accepted.
const SPLIT_PENALTY_FRACTION: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct StructureResult {
    pub sections: Vec<Section>,
    pub mix_in_s: f64,
    pub mix_out_s: f64,
    /// True when segmentation was too weak and the fixed-ratio fallback
    /// mix points were used.
    pub fallback: bool,
}

/// Detect sections and mix points from a per-second RMS envelope.
///
/// `envelope[i]` is the RMS of second `i`; `duration_s` is the true track
/// duration (the last envelope frame may be partial); `bpm` fixes the bar
/// grid (4/4 assumed).
pub fn detect_structure(envelope: &[f64], duration_s: f64, bpm: f64) -> StructureResult {
    let t_bar = 240.0 / bpm;
    let phrase = 16.0 * t_bar;

    let smoothed = smooth3(envelope);
    let boundaries = segment_envelope(&smoothed);

    // Fewer than 3 segments means the envelope carries no usable structure.
    if boundaries.len() < 4 {
        return fallback_structure(&smoothed, duration_s, phrase, t_bar);
    }

    let labels = label_segments(&smoothed, &boundaries);
    let sections = build_sections(&smoothed, &boundaries, &labels, duration_s, t_bar);

    // Mix in on the first phrase boundary at or after the intro ends; mix
    // out on the last phrase boundary at or before the outro starts.
    let intro_end = sections[0].end_s;
    let outro_start = sections[sections.len() - 1].start_s;
    let mix_in_s = ((intro_end / phrase).ceil() * phrase).clamp(0.0, duration_s / 2.0);
    let mix_out_s = ((outro_start / phrase).floor() * phrase).clamp(duration_s / 2.0, duration_s);

    if mix_in_s >= mix_out_s {
        // Both clamps collapsed onto the midpoint; the phrase grid does not
        // fit this track.
        return fallback_structure(&smoothed, duration_s, phrase, t_bar);
    }

    StructureResult {
        sections,
        mix_in_s,
        mix_out_s,
        fallback: false,
    }
}

/// Fixed-ratio mix points with a minimal intro/verse/outro section map.
fn fallback_structure(
    envelope: &[f64],
    duration_s: f64,
    phrase: f64,
    t_bar: f64,
) -> StructureResult {
    let mix_in_s = phrase.min(duration_s * 0.15);
    let mix_out_s = (duration_s - phrase).max(duration_s * 0.85);

    let mean_in = range_mean(envelope, 0.0, mix_in_s);
    let mean_mid = range_mean(envelope, mix_in_s, mix_out_s);
    let mean_out = range_mean(envelope, mix_out_s, duration_s);

    let sections = vec![
        make_section(SectionLabel::Intro, 0.0, mix_in_s, mean_in, t_bar),
        make_section(SectionLabel::Verse, mix_in_s, mix_out_s, mean_mid, t_bar),
        make_section(SectionLabel::Outro, mix_out_s, duration_s, mean_out, t_bar),
    ];

    StructureResult {
        sections,
        mix_in_s,
        mix_out_s,
        fallback: true,
    }
}

/// 3-point moving average, edges replicated.
fn smooth3(envelope: &[f64]) -> Vec<f64> {
    if envelope.len() < 3 {
        return envelope.to_vec();
    }
    let mut out = vec![0.0; envelope.len()];
    out[0] = envelope[0];
    out[envelope.len() - 1] = envelope[envelope.len() - 1];
    for i in 1..envelope.len() - 1 {
        out[i] = (envelope[i - 1] + envelope[i] + envelope[i + 1]) / 3.0;
    }
    out
}

/// Penalty-gated top-down binary segmentation.
///
/// Returns boundary frame indices including 0 and `envelope.len()`;
/// `boundaries.len() - 1` is the segment count.
fn segment_envelope(envelope: &[f64]) -> Vec<usize> {
    let n = envelope.len();
    if n < MIN_SEGMENT_FRAMES * 2 {
        return vec![0, n];
    }

    let prefix = PrefixSums::new(envelope);
    let total_cost = prefix.sse(0, n);
    let penalty = (total_cost * SPLIT_PENALTY_FRACTION).max(1e-12);

    let mut boundaries = vec![0, n];
    while boundaries.len() - 1 < MAX_SEGMENTS {
        // Best split over all current segments.
        let mut best: Option<(f64, usize)> = None;
        for pair in boundaries.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if hi - lo < MIN_SEGMENT_FRAMES * 2 {
                continue;
            }
            let parent = prefix.sse(lo, hi);
            for split in (lo + MIN_SEGMENT_FRAMES)..=(hi - MIN_SEGMENT_FRAMES) {
                let gain = parent - prefix.sse(lo, split) - prefix.sse(split, hi);
                if best.is_none_or(|(g, _)| gain > g) {
                    best = Some((gain, split));
                }
            }
        }

        match best {
            Some((gain, split)) if gain > penalty => {
                let pos = boundaries.partition_point(|&b| b < split);
                boundaries.insert(pos, split);
            }
            _ => break,
        }
    }

    boundaries
}

/// O(1) range mean / SSE over the envelope.
struct PrefixSums {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl PrefixSums {
    fn new(values: &[f64]) -> Self {
        let mut sum = Vec::with_capacity(values.len() + 1);
        let mut sum_sq = Vec::with_capacity(values.len() + 1);
        sum.push(0.0);
        sum_sq.push(0.0);
        for &v in values {
            sum.push(sum.last().unwrap() + v);
            sum_sq.push(sum_sq.last().unwrap() + v * v);
        }
        Self { sum, sum_sq }
    }

    /// Sum of squared deviations from the range mean over [lo, hi).
    fn sse(&self, lo: usize, hi: usize) -> f64 {
        let n = (hi - lo) as f64;
        if n < 1.0 {
            return 0.0;
        }
        let s = self.sum[hi] - self.sum[lo];
        let sq = self.sum_sq[hi] - self.sum_sq[lo];
        (sq - s * s / n).max(0.0)
    }

    fn mean(&self, lo: usize, hi: usize) -> f64 {
        if hi <= lo {
            return 0.0;
        }
        (self.sum[hi] - self.sum[lo]) / (hi - lo) as f64
    }
}

/// Labeling rule: first = intro, last = outro, loudest middle = drop, a
/// quiet middle segment flanked by louder neighbors = breakdown, rest verse.
fn label_segments(envelope: &[f64], boundaries: &[usize]) -> Vec<SectionLabel> {
    let prefix = PrefixSums::new(envelope);
    let seg_count = boundaries.len() - 1;
    let means: Vec<f64> = (0..seg_count)
        .map(|i| prefix.mean(boundaries[i], boundaries[i + 1]))
        .collect();

    let mut sorted = envelope.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let overall_median = if sorted.is_empty() {
        0.0
    } else {
        sorted[sorted.len() / 2]
    };

    let mut labels = vec![SectionLabel::Verse; seg_count];
    labels[0] = SectionLabel::Intro;
    labels[seg_count - 1] = SectionLabel::Outro;

    if seg_count > 2 {
        let middle = 1..seg_count - 1;
        if let Some(drop_idx) = middle
            .clone()
            .max_by(|&a, &b| means[a].partial_cmp(&means[b]).unwrap_or(std::cmp::Ordering::Equal))
        {
            labels[drop_idx] = SectionLabel::Drop;
        }
        for i in middle {
            if labels[i] == SectionLabel::Drop {
                continue;
            }
            if means[i] < overall_median * 0.5
                && means[i - 1] > means[i]
                && means[i + 1] > means[i]
            {
                labels[i] = SectionLabel::Breakdown;
            }
        }
    }

    labels
}

fn build_sections(
    envelope: &[f64],
    boundaries: &[usize],
    labels: &[SectionLabel],
    duration_s: f64,
    t_bar: f64,
) -> Vec<Section> {
    let prefix = PrefixSums::new(envelope);
    let seg_count = boundaries.len() - 1;

    (0..seg_count)
        .map(|i| {
            let start_s = if i == 0 { 0.0 } else { boundaries[i] as f64 };
            let end_s = if i == seg_count - 1 {
                duration_s
            } else {
                boundaries[i + 1] as f64
            };
            make_section(
                labels[i],
                start_s,
                end_s,
                prefix.mean(boundaries[i], boundaries[i + 1]),
                t_bar,
            )
        })
        .collect()
}

fn make_section(
    label: SectionLabel,
    start_s: f64,
    end_s: f64,
    avg_energy: f64,
    t_bar: f64,
) -> Section {
    Section {
        label,
        start_s,
        end_s,
        start_bar: (start_s / t_bar).round().max(0.0) as u32,
        end_bar: (end_s / t_bar).round().max(0.0) as u32,
        avg_energy,
    }
}

fn range_mean(envelope: &[f64], start_s: f64, end_s: f64) -> f64 {
    let lo = (start_s.floor() as usize).min(envelope.len());
    let hi = (end_s.ceil() as usize).min(envelope.len());
    if hi <= lo {
        return 0.0;
    }
    envelope[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Piecewise-constant envelope from (level, seconds) runs.
    fn envelope(runs: &[(f64, usize)]) -> Vec<f64> {
        runs.iter()
            .flat_map(|&(level, secs)| std::iter::repeat_n(level, secs))
            .collect()
    }

    fn assert_contiguous(sections: &[Section], duration_s: f64) {
        assert_eq!(sections[0].start_s, 0.0);
        assert_eq!(sections.last().unwrap().end_s, duration_s);
        for pair in sections.windows(2) {
            assert_eq!(pair[0].end_s, pair[1].start_s);
        }
        assert_eq!(sections[0].label, SectionLabel::Intro);
        assert_eq!(sections.last().unwrap().label, SectionLabel::Outro);
    }

    #[test]
    fn test_three_part_track() {
        // Quiet intro, loud body, quiet outro.
        let env = envelope(&[(0.1, 30), (0.8, 120), (0.1, 30)]);
        let result = detect_structure(&env, 180.0, 120.0);
        assert!(!result.fallback);
        assert_contiguous(&result.sections, 180.0);
        assert!(result.sections.len() >= 3);
        assert!(result
            .sections
            .iter()
            .any(|s| s.label == SectionLabel::Drop));
    }

    #[test]
    fn test_mix_points_snap_to_phrase_grid() {
        let env = envelope(&[(0.1, 30), (0.8, 180), (0.1, 30)]);
        let result = detect_structure(&env, 240.0, 120.0);
        assert!(!result.fallback);
        // Phrase at 120 BPM = 32 s.
        let phrase = 32.0;
        assert!((result.mix_in_s / phrase).fract().abs() < 1e-9);
        assert!((result.mix_out_s / phrase).fract().abs() < 1e-9);
        assert!(result.mix_in_s >= result.sections[0].end_s - 1e-9);
        assert!(result.mix_out_s <= result.sections.last().unwrap().start_s + 1e-9);
        assert!(result.mix_in_s < result.mix_out_s);
    }

    #[test]
    fn test_breakdown_labeling() {
        // Loud, near-silent valley, loud again; valley is under half the
        // median and flanked by louder segments.
        let env = envelope(&[(0.1, 20), (0.8, 60), (0.05, 20), (0.8, 60), (0.1, 20)]);
        let result = detect_structure(&env, 180.0, 120.0);
        assert!(!result.fallback);
        assert!(
            result
                .sections
                .iter()
                .any(|s| s.label == SectionLabel::Breakdown),
            "expected a breakdown in {:?}",
            result.sections
        );
    }

    #[test]
    fn test_silence_uses_fallback_points() {
        // 180 s of silence at the 120 BPM default tempo.
        let env = vec![0.0; 180];
        let result = detect_structure(&env, 180.0, 120.0);
        assert!(result.fallback);
        assert!((result.mix_in_s - 27.0).abs() <= 0.5, "{}", result.mix_in_s);
        assert!(
            (result.mix_out_s - 153.0).abs() <= 0.5,
            "{}",
            result.mix_out_s
        );
        let labels: Vec<_> = result.sections.iter().map(|s| s.label).collect();
        assert_eq!(
            labels,
            vec![SectionLabel::Intro, SectionLabel::Verse, SectionLabel::Outro]
        );
        assert_contiguous(&result.sections, 180.0);
    }

    #[test]
    fn test_flat_envelope_falls_back() {
        let env = vec![0.5; 200];
        let result = detect_structure(&env, 200.0, 128.0);
        assert!(result.fallback, "flat envelope has no change points");
        assert!(result.mix_in_s < result.mix_out_s);
    }

    #[test]
    fn test_mix_in_clamped_to_first_half() {
        // Intro stretches past the halfway mark; mix-in must clamp to
        // duration/2.
        let env = envelope(&[(0.05, 70), (0.8, 30), (0.1, 20)]);
        let result = detect_structure(&env, 120.0, 120.0);
        if !result.fallback {
            assert!(result.mix_in_s <= 60.0 + 1e-9);
            assert!(result.mix_in_s < result.mix_out_s);
        }
    }

    #[test]
    fn test_bar_numbers_follow_grid() {
        let env = envelope(&[(0.1, 32), (0.8, 128), (0.1, 32)]);
        let result = detect_structure(&env, 192.0, 120.0);
        // t_bar = 2 s at 120 BPM.
        for section in &result.sections {
            assert_eq!(section.start_bar, (section.start_s / 2.0).round() as u32);
            assert_eq!(section.end_bar, (section.end_s / 2.0).round() as u32);
        }
    }

    #[test]
    fn test_segment_count_bounds() {
        // Highly varied envelope must not exceed the segment ceiling.
        let mut runs = Vec::new();
        for i in 0..20 {
            runs.push((if i % 2 == 0 { 0.2 } else { 0.9 }, 15));
        }
        let env = envelope(&runs);
        let result = detect_structure(&env, 300.0, 120.0);
        assert!(!result.fallback);
        assert!(result.sections.len() <= MAX_SEGMENTS);
        assert!(result.sections.len() >= 3);
    }
}
