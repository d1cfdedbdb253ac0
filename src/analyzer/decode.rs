//! Audio decoding front-end.
//!
//! Symphonia handles the container/codec zoo; everything downstream of this
//! module works on mono f32 PCM at the fixed analysis sample rate.

use std::path::Path;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported or unrecognized format: {0}")]
    Probe(String),
    #[error("no audio track in file")]
    NoAudioTrack,
    #[error("decoder error: {0}")]
    Decoder(String),
    #[error("decoded PCM is invalid: {0}")]
    InvalidPcm(&'static str),
}

/// Mono f32 PCM at a known sample rate.
#[derive(Debug, Clone)]
pub struct MonoPcm {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoPcm {
    pub fn duration_s(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Decode a file to mono f32 at `target_rate`.
///
/// Multichannel input is averaged down to mono; the native-rate signal is
/// then linearly resampled. Corrupted packets are skipped rather than
/// aborting the decode. The result is validated: empty or non-finite PCM is
/// rejected.
pub fn decode_to_mono(path: &Path, target_rate: u32) -> Result<MonoPcm, DecodeError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Probe(e.to_string()))?;

    let mut format = probed.format;
    let track = format.default_track().ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Decoder(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(DecodeError::Decoder(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => mix_to_mono(&decoded, &mut samples),
            Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                log::debug!("{}: skipping corrupted packet: {}", path.display(), msg);
                continue;
            }
            Err(e) => return Err(DecodeError::Decoder(e.to_string())),
        }
    }

    let pcm = MonoPcm {
        samples: resample_linear(&samples, sample_rate, target_rate),
        sample_rate: target_rate,
    };
    validate(&pcm)?;
    Ok(pcm)
}

/// Reject PCM the analysis stages cannot work with.
pub fn validate(pcm: &MonoPcm) -> Result<(), DecodeError> {
    if pcm.samples.is_empty() {
        return Err(DecodeError::InvalidPcm("zero duration"));
    }
    if pcm.samples.iter().any(|s| !s.is_finite()) {
        return Err(DecodeError::InvalidPcm("NaN or infinite sample"));
    }
    Ok(())
}

fn mix_to_mono(decoded: &AudioBufferRef, out: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::F32(buf) => mix_buffer(buf, out),
        AudioBufferRef::F64(buf) => mix_buffer(buf, out),
        AudioBufferRef::U8(buf) => mix_buffer(buf, out),
        AudioBufferRef::U16(buf) => mix_buffer(buf, out),
        AudioBufferRef::U24(buf) => mix_buffer(buf, out),
        AudioBufferRef::U32(buf) => mix_buffer(buf, out),
        AudioBufferRef::S8(buf) => mix_buffer(buf, out),
        AudioBufferRef::S16(buf) => mix_buffer(buf, out),
        AudioBufferRef::S24(buf) => mix_buffer(buf, out),
        AudioBufferRef::S32(buf) => mix_buffer(buf, out),
    }
}

/// Average all channels of one decoded buffer into `out`.
fn mix_buffer<S>(buf: &symphonia::core::audio::AudioBuffer<S>, out: &mut Vec<f32>)
where
    S: symphonia::core::sample::Sample,
    f32: FromSample<S>,
{
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    if channels == 0 || frames == 0 {
        return;
    }

    if channels == 1 {
        out.extend(buf.chan(0).iter().map(|&s| f32::from_sample(s)));
        return;
    }

    let base = out.len();
    out.resize(base + frames, 0.0);
    let scale = 1.0 / channels as f32;
    for ch in 0..channels {
        for (i, &sample) in buf.chan(ch).iter().enumerate() {
            out[base + i] += f32::from_sample(sample) * scale;
        }
    }
}

/// Linear-interpolation resampler. Analysis features are coarse (envelopes,
/// chroma bins, band ratios), so interpolation artifacts are inaudible to
/// them; a polyphase resampler would buy nothing here.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = i as f64 * ratio;
        let i0 = src.floor() as usize;
        let i1 = (i0 + 1).min(samples.len() - 1);
        let frac = (src - i0 as f64) as f32;
        out.push(samples[i0] * (1.0 - frac) + samples[i1] * frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.0, 0.5, 1.0, 0.5];
        assert_eq!(resample_linear(&samples, 22_050, 22_050), samples);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 / 100.0).sin()).collect();
        let out = resample_linear(&samples, 44_100, 22_050);
        assert_eq!(out.len(), 500);
        // Interpolated signal stays within the input range
        assert!(out.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_resample_preserves_constant_signal() {
        let samples = vec![0.25f32; 4410];
        let out = resample_linear(&samples, 44_100, 22_050);
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_validate_rejects_empty() {
        let pcm = MonoPcm {
            samples: vec![],
            sample_rate: 22_050,
        };
        assert!(matches!(
            validate(&pcm),
            Err(DecodeError::InvalidPcm("zero duration"))
        ));
    }

    #[test]
    fn test_validate_rejects_nan() {
        let pcm = MonoPcm {
            samples: vec![0.0, f32::NAN, 0.1],
            sample_rate: 22_050,
        };
        assert!(matches!(validate(&pcm), Err(DecodeError::InvalidPcm(_))));
    }

    #[test]
    fn test_validate_accepts_normal_pcm() {
        let pcm = MonoPcm {
            samples: vec![0.0, 0.5, -0.5],
            sample_rate: 22_050,
        };
        assert!(validate(&pcm).is_ok());
    }
}
