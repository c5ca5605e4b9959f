//! Audio file decoding for the analysis commands.
//!
//! Everything downstream works on mono 16 kHz f32 samples in [-1, 1].
//! `.pcm` files are raw s16le at 16 kHz mono (the host's capture format);
//! all other formats go through the symphonia probe with channel downmix and
//! a linear resample.

use crate::error::{Result, SidecarError};
use std::path::Path;

/// Target sample rate for all decoded audio.
pub const SAMPLE_RATE: u32 = 16_000;

/// Decode an audio file to mono 16 kHz f32 samples.
///
/// # Errors
///
/// Returns an error if the file does not exist, cannot be probed, or cannot
/// be decoded. An empty (zero-sample) result is not an error; callers treat
/// it as a no-op segment.
pub fn decode_mono_16k(path: &Path) -> Result<Vec<f32>> {
    if !path.exists() {
        return Err(SidecarError::Audio(format!(
            "Audio file not found: {}",
            path.display()
        )));
    }

    if path.extension().and_then(|e| e.to_str()) == Some("pcm") {
        return read_raw_pcm(path);
    }

    let (samples, rate) = decode_to_mono_f32(path)?;
    if rate == SAMPLE_RATE {
        Ok(samples)
    } else {
        Ok(resample_linear_mono(&samples, rate, SAMPLE_RATE))
    }
}

/// Read raw s16le 16 kHz mono PCM and convert to f32 in [-1, 1].
fn read_raw_pcm(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            f32::from(value) / 32768.0
        })
        .collect();
    Ok(samples)
}

/// Decode any probe-supported format to mono f32 at its native rate.
fn decode_to_mono_f32(path: &Path) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

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
        .map_err(|e| {
            SidecarError::Audio(format!("unsupported audio format {}: {e}", path.display()))
        })?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| SidecarError::Audio("no default audio track".to_owned()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let rate = codec_params
        .sample_rate
        .ok_or_else(|| SidecarError::Audio("unknown sample rate".to_owned()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| SidecarError::Audio(format!("failed to create decoder: {e}")))?;

    let mut out: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) => {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    break;
                }
                return Err(SidecarError::Audio(format!("audio read error: {e}")));
            }
            Err(e) => return Err(SidecarError::Audio(format!("audio read error: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(SidecarError::Audio(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.frames() as u64;

        let required = usize::try_from(frames)
            .unwrap_or(usize::MAX)
            .saturating_mul(channels);
        let needs_new = match sample_buf.as_ref() {
            Some(b) => b.capacity() < required,
            None => true,
        };

        if needs_new {
            sample_buf = Some(SampleBuffer::<f32>::new(frames, spec));
        } else if let Some(b) = sample_buf.as_mut() {
            b.clear();
        }

        if let Some(b) = sample_buf.as_mut() {
            b.copy_interleaved_ref(decoded);
        }

        let data = match sample_buf.as_ref() {
            Some(b) => b.samples(),
            None => &[],
        };
        if channels <= 1 {
            out.extend_from_slice(data);
        } else {
            for frame in data.chunks_exact(channels) {
                let sum: f32 = frame.iter().sum();
                out.push(sum / channels as f32);
            }
        }
    }

    Ok((out, rate))
}

/// Linear-interpolation resample of a mono signal.
fn resample_linear_mono(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == to_rate {
        return input.to_vec();
    }

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let out_len = ((input.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = (i as f64) / ratio;
        let src_i0 = src_pos.floor() as isize;
        let src_i1 = src_i0 + 1;
        let t = (src_pos - src_i0 as f64) as f32;

        let s0 = sample_clamped(input, src_i0);
        let s1 = sample_clamped(input, src_i1);
        out.push(s0 * (1.0 - t) + s1 * t);
    }

    out
}

fn sample_clamped(input: &[f32], idx: isize) -> f32 {
    if idx <= 0 {
        return input[0];
    }
    let idx = idx as usize;
    if idx >= input.len() {
        return input[input.len() - 1];
    }
    input[idx]
}
