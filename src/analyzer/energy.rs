//! Energy descriptors: frame RMS and spectral bass ratio.

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

/// STFT parameters for the bass ratio.
const BASS_FFT_SIZE: usize = 2048;
const BASS_HOP_SIZE: usize = 512;

/// Bass band in Hz.
const BASS_LOW: f64 = 20.0;
const BASS_HIGH: f64 = 200.0;

/// Fraction trimmed off each end of the sorted frame-RMS distribution.
const TRIM_FRACTION: f64 = 0.05;

/// Mean RMS over non-overlapping 1-second frames with the top and bottom 5%
/// trimmed, clamped to [0, 1].
pub fn mean_rms_energy(samples: &[f32], sample_rate: u32) -> f64 {
    let frames = frame_rms(samples, sample_rate);
    if frames.is_empty() {
        return 0.0;
    }

    let mut sorted = frames;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let trim = (sorted.len() as f64 * TRIM_FRACTION).floor() as usize;
    let kept = &sorted[trim..sorted.len() - trim];
    if kept.is_empty() {
        return 0.0;
    }

    let mean = kept.iter().sum::<f64>() / kept.len() as f64;
    mean.clamp(0.0, 1.0)
}

/// RMS of each non-overlapping 1-second frame. A trailing partial frame of
/// at least a quarter second still contributes.
pub fn frame_rms(samples: &[f32], sample_rate: u32) -> Vec<f64> {
    let frame_len = sample_rate as usize;
    if frame_len == 0 || samples.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(samples.len() / frame_len + 1);
    let mut start = 0;
    while start < samples.len() {
        let end = (start + frame_len).min(samples.len());
        let frame = &samples[start..end];
        if frame.len() >= frame_len / 4 {
            let sum_sq: f64 = frame.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
            out.push((sum_sq / frame.len() as f64).sqrt());
        }
        start = end;
    }
    out
}

/// Mean per-frame ratio of spectral magnitude in [20, 200] Hz over the full
/// [20, sr/2] band, clamped to [0, 1]. High values mean bass-heavy material.
pub fn bass_intensity(samples: &[f32], sample_rate: u32) -> f64 {
    if samples.len() < BASS_FFT_SIZE {
        return 0.0;
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(BASS_FFT_SIZE);

    let window: Vec<f32> = (0..BASS_FFT_SIZE)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (BASS_FFT_SIZE - 1) as f32).cos()))
        .collect();

    let bin_hz = f64::from(sample_rate) / BASS_FFT_SIZE as f64;
    let bins = BASS_FFT_SIZE / 2 + 1;

    let num_frames = (samples.len() - BASS_FFT_SIZE) / BASS_HOP_SIZE + 1;
    let mut buffer = vec![Complex::new(0.0f32, 0.0f32); BASS_FFT_SIZE];
    let mut ratio_sum = 0.0f64;
    let mut ratio_count = 0usize;

    for frame_idx in 0..num_frames {
        let start = frame_idx * BASS_HOP_SIZE;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(samples[start + i] * window[i], 0.0);
        }
        fft.process(&mut buffer);

        let mut bass = 0.0f64;
        let mut total = 0.0f64;
        for (bin, slot) in buffer.iter().take(bins).enumerate() {
            let freq = bin as f64 * bin_hz;
            if freq < BASS_LOW {
                continue;
            }
            let mag = f64::from(slot.norm());
            total += mag;
            if freq <= BASS_HIGH {
                bass += mag;
            }
        }
        if total > 1e-12 {
            ratio_sum += bass / total;
            ratio_count += 1;
        }
    }

    if ratio_count == 0 {
        return 0.0;
    }
    (ratio_sum / ratio_count as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, amplitude: f32, sample_rate: u32, duration_s: f64) -> Vec<f32> {
        let total = (f64::from(sample_rate) * duration_s) as usize;
        (0..total)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_full_scale_sine_rms() {
        // RMS of a unit sine is 1/sqrt(2).
        let samples = sine(440.0, 1.0, 22_050, 10.0);
        let energy = mean_rms_energy(&samples, 22_050);
        assert!(
            (energy - 1.0 / 2.0f64.sqrt()).abs() < 0.01,
            "expected ~0.707, got {energy}"
        );
    }

    #[test]
    fn test_silence_has_zero_energy() {
        let samples = vec![0.0f32; 22_050 * 5];
        assert_eq!(mean_rms_energy(&samples, 22_050), 0.0);
    }

    #[test]
    fn test_trim_discards_outlier_frames() {
        // 30 quiet seconds with one full-scale second; the loud frame falls
        // in the trimmed top 5%.
        let mut samples = sine(440.0, 0.1, 22_050, 30.0);
        let loud = sine(440.0, 1.0, 22_050, 1.0);
        samples[..loud.len()].copy_from_slice(&loud);
        let energy = mean_rms_energy(&samples, 22_050);
        assert!(
            (energy - 0.1 / 2.0f64.sqrt()).abs() < 0.01,
            "outlier frame should be trimmed, got {energy}"
        );
    }

    #[test]
    fn test_bass_sine_ratio_near_one() {
        let samples = sine(60.0, 0.8, 22_050, 5.0);
        let bass = bass_intensity(&samples, 22_050);
        assert!(bass > 0.8, "60 Hz sine should be almost all bass, got {bass}");
    }

    #[test]
    fn test_treble_sine_ratio_near_zero() {
        let samples = sine(4000.0, 0.8, 22_050, 5.0);
        let bass = bass_intensity(&samples, 22_050);
        assert!(bass < 0.2, "4 kHz sine should carry no bass, got {bass}");
    }

    #[test]
    fn test_bass_intensity_of_silence() {
        let samples = vec![0.0f32; 22_050 * 5];
        assert_eq!(bass_intensity(&samples, 22_050), 0.0);
    }

    #[test]
    fn test_values_clamped_to_unit_range() {
        let samples = sine(100.0, 1.5, 22_050, 5.0); // clipping-level input
        let energy = mean_rms_energy(&samples, 22_050);
        let bass = bass_intensity(&samples, 22_050);
        assert!((0.0..=1.0).contains(&energy));
        assert!((0.0..=1.0).contains(&bass));
    }
}
