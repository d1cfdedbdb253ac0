//! Tempo estimation via onset-envelope autocorrelation.
//!
//! The onset envelope is half-wave-rectified spectral flux. Its
//! autocorrelation peaks at the beat period; the search is biased toward the
//! 90-150 BPM band where DJ material lives, with octave-error correction at
//! the band edges.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TempoError {
    #[error("signal too short for tempo analysis")]
    TooShort,
    #[error("no prominent tempo peak (prominence {prominence:.3} < {threshold:.3})")]
    NoProminentPeak { prominence: f64, threshold: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct TempoEstimate {
    /// Beats per minute, rounded to one decimal, within [40, 220].
    pub bpm: f64,
    /// Normalized autocorrelation peak height, [0, 1].
    pub confidence: f64,
    /// True when the envelope was degenerate (near-silence) and the default
    /// tempo was substituted.
    pub fallback: bool,
}

/// STFT frame for the onset envelope.
const FRAME_SIZE: usize = 1024;
/// Envelope hop. 256 samples at 22050 Hz gives ~86 envelope frames per
/// second, enough lag resolution to land within half a BPM after refinement.
const HOP_SIZE: usize = 256;

const BPM_MIN: f64 = 40.0;
const BPM_MAX: f64 = 220.0;

/// Tempo substituted when the envelope carries no onsets at all (silence).
const DEFAULT_BPM: f64 = 120.0;

/// Peak-over-median prominence a candidate must reach, measured on the
/// zero-lag-normalized autocorrelation over the search band.
const MIN_PROMINENCE: f64 = 0.15;

/// Octave correction: a competing half/double lag wins if its score is
/// within this fraction of the best.
const OCTAVE_TOLERANCE: f64 = 0.10;

/// Estimate the tempo of mono PCM at `sample_rate`.
pub fn estimate_bpm(samples: &[f32], sample_rate: u32) -> Result<TempoEstimate, TempoError> {
    if samples.len() < FRAME_SIZE * 4 {
        return Err(TempoError::TooShort);
    }

    let flux = onset_envelope(samples);
    let fps = f64::from(sample_rate) / HOP_SIZE as f64;

    // Silence has no onsets; there is no tempo to fail at, only a default
    // to fall back to so downstream bar math stays defined.
    let flux_peak = flux.iter().cloned().fold(0.0f32, f32::max);
    if flux.is_empty() || flux_peak < 1e-6 {
        return Ok(TempoEstimate {
            bpm: DEFAULT_BPM,
            confidence: 0.0,
            fallback: true,
        });
    }

    let min_lag = (60.0 * fps / BPM_MAX).floor() as usize;
    let max_lag = (60.0 * fps / BPM_MIN).ceil() as usize;
    if max_lag * 2 >= flux.len() || min_lag < 2 {
        return Err(TempoError::TooShort);
    }

    // Zero-mean the envelope so the autocorrelation's DC lobe does not
    // swamp the beat-period peaks, then normalize by lag zero.
    let mean = flux.iter().sum::<f32>() / flux.len() as f32;
    let centered: Vec<f32> = flux.iter().map(|&v| v - mean).collect();
    // Keep lags out to 4x the slowest period for harmonic refinement.
    let ac_len = (max_lag * 4 + 2).min(centered.len());
    let ac = autocorrelation(&centered, ac_len);
    let ac0 = ac[0].max(1e-12);
    let norm: Vec<f64> = ac.iter().map(|&v| f64::from(v) / f64::from(ac0)).collect();

    // Weighted peak pick over the lag band.
    let mut best_lag = 0usize;
    let mut best_score = f64::NEG_INFINITY;
    for lag in min_lag..=max_lag.min(norm.len() - 1) {
        let bpm = 60.0 * fps / lag as f64;
        let score = norm[lag] * band_weight(bpm);
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }

    // Prominence gate: the peak must stand clear of the band's median.
    let mut band: Vec<f64> = norm[min_lag..=max_lag.min(norm.len() - 1)].to_vec();
    band.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = band[band.len() / 2];
    let prominence = norm[best_lag] - median;
    if prominence < MIN_PROMINENCE {
        return Err(TempoError::NoProminentPeak {
            prominence,
            threshold: MIN_PROMINENCE,
        });
    }

    // Octave-error correction at the band edges.
    let mut lag = best_lag as f64;
    let bpm = 60.0 * fps / lag;
    if bpm < 80.0 {
        let half = best_lag / 2;
        if half >= min_lag && norm[half] * band_weight(60.0 * fps / half as f64)
            >= best_score * (1.0 - OCTAVE_TOLERANCE)
        {
            lag = half as f64;
        }
    } else if bpm > 180.0 {
        let double = best_lag * 2;
        if double <= max_lag && norm[double] * band_weight(60.0 * fps / double as f64)
            >= best_score * (1.0 - OCTAVE_TOLERANCE)
        {
            lag = double as f64;
        }
    }

    let lag = refine_lag(&norm, lag, min_lag);
    let bpm = (60.0 * fps / lag).clamp(BPM_MIN, BPM_MAX);

    Ok(TempoEstimate {
        bpm: (bpm * 10.0).round() / 10.0,
        confidence: norm[best_lag].clamp(0.0, 1.0),
        fallback: false,
    })
}

/// Triangular bias toward the 90-150 BPM band, centered at 120, on top of a
/// unit floor so out-of-band tempos stay eligible.
fn band_weight(bpm: f64) -> f64 {
    1.0 + 0.3 * (1.0 - (bpm - 120.0).abs() / 30.0).max(0.0)
}

/// Half-wave-rectified spectral flux of the Hann-windowed STFT.
fn onset_envelope(samples: &[f32]) -> Vec<f32> {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(FRAME_SIZE);

    let window: Vec<f32> = (0..FRAME_SIZE)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (FRAME_SIZE - 1) as f32).cos()))
        .collect();

    let num_frames = (samples.len() - FRAME_SIZE) / HOP_SIZE + 1;
    let bins = FRAME_SIZE / 2 + 1;
    let mut prev_mag = vec![0.0f32; bins];
    let mut flux = Vec::with_capacity(num_frames);
    let mut buffer = vec![Complex::new(0.0f32, 0.0f32); FRAME_SIZE];

    for frame_idx in 0..num_frames {
        let start = frame_idx * HOP_SIZE;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(samples[start + i] * window[i], 0.0);
        }
        fft.process(&mut buffer);

        let mut frame_flux = 0.0f32;
        for (bin, slot) in buffer.iter().take(bins).enumerate() {
            let mag = slot.norm();
            frame_flux += (mag - prev_mag[bin]).max(0.0);
            prev_mag[bin] = mag;
        }
        flux.push(frame_flux);
    }

    // First frame's flux is the raw magnitude sum; zero it so the decode
    // transient does not register as an onset.
    if let Some(first) = flux.first_mut() {
        *first = 0.0;
    }
    flux
}

/// FFT autocorrelation of `signal`, returned for lags 0..max_lag.
fn autocorrelation(signal: &[f32], max_lag: usize) -> Vec<f32> {
    let n = (signal.len() + max_lag).next_power_of_two();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .map(|&x| Complex::new(x, 0.0))
        .chain(std::iter::repeat_n(Complex::new(0.0, 0.0), n - signal.len()))
        .collect();

    fft.process(&mut buffer);
    for c in buffer.iter_mut() {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    ifft.process(&mut buffer);

    buffer[..max_lag.min(buffer.len())]
        .iter()
        .map(|c| c.re / n as f32)
        .collect()
}

/// Sharpen a lag estimate: parabolic interpolation at the peak, then
/// re-anchoring on the highest in-range harmonic of the period, whose
/// relative quantization error is proportionally smaller.
fn refine_lag(norm: &[f64], lag: f64, min_lag: usize) -> f64 {
    let refined = parabolic_peak(norm, lag.round() as usize, min_lag);

    for k in [4usize, 3, 2] {
        let target = refined * k as f64;
        let center = target.round() as usize;
        if center + 2 >= norm.len() {
            continue;
        }
        // Local peak within +/-2 lags of the expected harmonic.
        let lo = center.saturating_sub(2).max(1);
        let hi = (center + 2).min(norm.len() - 2);
        let local = (lo..=hi)
            .max_by(|&a, &b| norm[a].partial_cmp(&norm[b]).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or(center);
        if norm[local] <= 0.0 {
            continue;
        }
        return parabolic_peak(norm, local, lo) / k as f64;
    }
    refined
}

fn parabolic_peak(norm: &[f64], peak: usize, floor: usize) -> f64 {
    if peak <= floor.max(1) || peak + 1 >= norm.len() {
        return peak as f64;
    }
    let (y0, y1, y2) = (norm[peak - 1], norm[peak], norm[peak + 1]);
    let denom = y0 - 2.0 * y1 + y2;
    if denom.abs() < 1e-12 {
        return peak as f64;
    }
    let p = (0.5 * (y0 - y2) / denom).clamp(-0.5, 0.5);
    peak as f64 + p
}

#[cfg(test)]
pub(crate) mod test_signals {
    use std::f32::consts::PI;

    /// Click track: a short decaying 1 kHz burst on every beat.
    pub fn click_track(bpm: f64, sample_rate: u32, duration_s: f64) -> Vec<f32> {
        let total = (f64::from(sample_rate) * duration_s) as usize;
        let mut samples = vec![0.0f32; total];
        let samples_per_beat = 60.0 / bpm * f64::from(sample_rate);
        let click_len = (f64::from(sample_rate) * 0.005) as usize;

        let mut position = 0.0f64;
        while (position as usize) < total {
            let start = position as usize;
            for j in 0..click_len {
                if start + j < total {
                    let t = j as f32 / sample_rate as f32;
                    samples[start + j] = (2.0 * PI * 1000.0 * t).sin() * (-t * 500.0).exp();
                }
            }
            position += samples_per_beat;
        }
        samples
    }

    /// Deterministic pseudo-random noise (LCG), amplitude about [-0.5, 0.5].
    pub fn noise(sample_rate: u32, duration_s: f64) -> Vec<f32> {
        let total = (f64::from(sample_rate) * duration_s) as usize;
        let mut state = 0x2545_f491_4f6c_dd1du64;
        (0..total)
            .map(|_| {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_signals::{click_track, noise};
    use super::*;

    #[test]
    fn test_click_track_128() {
        let samples = click_track(128.0, 22_050, 10.0);
        let est = estimate_bpm(&samples, 22_050).expect("tempo should resolve");
        assert!(!est.fallback);
        assert!(
            (est.bpm - 128.0).abs() <= 0.5,
            "expected ~128 BPM, got {}",
            est.bpm
        );
    }

    #[test]
    fn test_click_track_120() {
        let samples = click_track(120.0, 22_050, 12.0);
        let est = estimate_bpm(&samples, 22_050).expect("tempo should resolve");
        assert!(
            (est.bpm - 120.0).abs() <= 0.5,
            "expected ~120 BPM, got {}",
            est.bpm
        );
    }

    #[test]
    fn test_click_track_96() {
        let samples = click_track(96.0, 22_050, 15.0);
        let est = estimate_bpm(&samples, 22_050).expect("tempo should resolve");
        assert!(
            (est.bpm - 96.0).abs() <= 1.0,
            "expected ~96 BPM, got {}",
            est.bpm
        );
    }

    #[test]
    fn test_silence_falls_back_to_default() {
        let samples = vec![0.0f32; 22_050 * 10];
        let est = estimate_bpm(&samples, 22_050).unwrap();
        assert!(est.fallback);
        assert_eq!(est.bpm, 120.0);
        assert_eq!(est.confidence, 0.0);
    }

    #[test]
    fn test_noise_has_no_prominent_peak() {
        let samples = noise(22_050, 10.0);
        let result = estimate_bpm(&samples, 22_050);
        assert!(
            matches!(result, Err(TempoError::NoProminentPeak { .. })),
            "noise should fail the prominence gate, got {result:?}"
        );
    }

    #[test]
    fn test_too_short_signal() {
        let samples = vec![0.1f32; 512];
        assert!(matches!(
            estimate_bpm(&samples, 22_050),
            Err(TempoError::TooShort)
        ));
    }

    #[test]
    fn test_bpm_is_rounded_to_one_decimal() {
        let samples = click_track(128.0, 22_050, 10.0);
        let est = estimate_bpm(&samples, 22_050).unwrap();
        assert_eq!(est.bpm, (est.bpm * 10.0).round() / 10.0);
    }

    #[test]
    fn test_band_weight_shape() {
        assert!((band_weight(120.0) - 1.3).abs() < 1e-9);
        assert!((band_weight(90.0) - 1.0).abs() < 1e-9);
        assert!((band_weight(150.0) - 1.0).abs() < 1e-9);
        assert!((band_weight(60.0) - 1.0).abs() < 1e-9);
        assert!(band_weight(120.0) > band_weight(105.0));
    }
}
