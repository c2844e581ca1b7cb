//! Sample-format adaptation for the recognizer's reference format.
//!
//! The streaming recognizer consumes **16 kHz, 16-bit, mono** PCM while
//! capture devices deliver whatever they prefer (typically 44.1/48 kHz,
//! stereo, `f32`).  The device layer runs every callback through:
//!
//! 1. [`downmix_to_mono`] — average interleaved channels.
//! 2. [`resample_to_16k`] — linear interpolation to 16 000 Hz.  Linear is
//!    plenty for speech; `rubato` is in Cargo.toml as the upgrade path to a
//!    windowed-sinc resampler if recognition quality ever demands it.
//! 3. [`f32_to_pcm16`] — clamp and quantize to little-endian `i16` bytes.

/// Target rate consumed by the recognizer.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Average interleaved multi-channel samples down to one channel.
///
/// Mono input is returned unchanged (owned); zero channels yields an empty
/// vector.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample_to_16k
// ---------------------------------------------------------------------------

/// Linearly resample mono samples from `source_rate` to 16 kHz.
///
/// A 16 kHz input is passed through untouched.
pub fn resample_to_16k(samples: &[f32], source_rate: u32) -> Vec<f32> {
    if source_rate == TARGET_SAMPLE_RATE {
        return samples.to_vec();
    }
    if samples.is_empty() || source_rate == 0 {
        return Vec::new();
    }

    let ratio = TARGET_SAMPLE_RATE as f64 / source_rate as f64;
    let out_len = (samples.len() as f64 * ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 / ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let sample = match (samples.get(idx), samples.get(idx + 1)) {
            (Some(&a), Some(&b)) => a + (b - a) * frac,
            (Some(&a), None) => a,
            _ => 0.0,
        };
        out.push(sample);
    }
    out
}

// ---------------------------------------------------------------------------
// f32_to_pcm16
// ---------------------------------------------------------------------------

/// Quantize `[-1.0, 1.0]` samples to little-endian 16-bit PCM bytes.
///
/// Out-of-range samples are clamped rather than wrapped.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Reinterpret little-endian 16-bit PCM bytes as `i16` samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
