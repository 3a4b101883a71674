//! Audio frame types and the G.711 µ-law codec
//!
//! Frames travel through the call in their wire encoding. DSP stages
//! (echo cancellation, VAD) decode to normalized `f32` on demand via
//! [`AudioFrame::to_samples`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    #[default]
    Hz8000,
    /// 16kHz - Wideband / browser
    Hz16000,
    /// 24kHz - Common TTS output
    Hz24000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz24000 => 24000,
        }
    }

    /// Parse from a raw rate in Hz
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            8000 => Some(SampleRate::Hz8000),
            16000 => Some(SampleRate::Hz16000),
            24000 => Some(SampleRate::Hz24000),
            _ => None,
        }
    }

    /// Samples in a frame of the given duration
    pub fn samples_for(&self, frame_ms: u32) -> usize {
        (self.as_u32() as usize * frame_ms as usize) / 1000
    }

    /// Get frame size for 20ms chunk
    pub fn frame_size_20ms(&self) -> usize {
        self.samples_for(20)
    }
}

/// Audio encoding formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// G.711 µ-law (telephony)
    #[default]
    Mulaw,
    /// 16-bit signed PCM (little-endian)
    #[serde(alias = "linear16")]
    Pcm16,
}

impl AudioEncoding {
    /// Bytes per mono sample
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioEncoding::Mulaw => 1,
            AudioEncoding::Pcm16 => 2,
        }
    }

    /// Wire name used by speech services
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEncoding::Mulaw => "mulaw",
            AudioEncoding::Pcm16 => "linear16",
        }
    }

    /// Byte value that decodes to digital silence
    pub fn silence_byte(&self) -> u8 {
        match self {
            AudioEncoding::Mulaw => MULAW_SILENCE,
            AudioEncoding::Pcm16 => 0,
        }
    }
}

/// Format of a mono audio stream: encoding plus sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: SampleRate,
}

impl AudioFormat {
    /// 8kHz µ-law, the telephony default
    pub fn telephony() -> Self {
        Self {
            encoding: AudioEncoding::Mulaw,
            sample_rate: SampleRate::Hz8000,
        }
    }

    /// Bytes in one frame of `frame_ms`
    pub fn frame_bytes(&self, frame_ms: u32) -> usize {
        self.sample_rate.samples_for(frame_ms) * self.encoding.bytes_per_sample()
    }

    /// Playback duration of `len` encoded bytes
    pub fn duration_of(&self, len: usize) -> Duration {
        let samples = len / self.encoding.bytes_per_sample();
        Duration::from_micros(samples as u64 * 1_000_000 / self.sample_rate.as_u32() as u64)
    }
}

/// One encoded, fixed-duration audio frame.
///
/// Frames are moved, never shared: once handed to a channel or sink the
/// producer no longer holds the payload.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Encoded payload
    pub payload: Vec<u8>,
    /// Encoding and rate of the payload
    pub format: AudioFormat,
    /// Frame sequence number for ordering
    pub sequence: u64,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("payload_len", &self.payload.len())
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl AudioFrame {
    /// Wrap an encoded payload
    pub fn new(payload: Vec<u8>, format: AudioFormat, sequence: u64) -> Self {
        Self {
            payload,
            format,
            sequence,
        }
    }

    /// A frame of digital silence lasting `frame_ms`
    pub fn silence(format: AudioFormat, frame_ms: u32, sequence: u64) -> Self {
        let payload = vec![format.encoding.silence_byte(); format.frame_bytes(frame_ms)];
        Self::new(payload, format, sequence)
    }

    /// Encode normalized samples ([-1.0, 1.0]) into a frame
    pub fn from_samples(samples: &[f32], format: AudioFormat, sequence: u64) -> Self {
        let payload = match format.encoding {
            AudioEncoding::Mulaw => samples
                .iter()
                .map(|&s| mulaw_encode(f32_to_i16(s)))
                .collect(),
            AudioEncoding::Pcm16 => samples
                .iter()
                .flat_map(|&s| f32_to_i16(s).to_le_bytes())
                .collect(),
        };
        Self::new(payload, format, sequence)
    }

    /// Decode to normalized f32 samples
    pub fn to_samples(&self) -> Vec<f32> {
        match self.format.encoding {
            AudioEncoding::Mulaw => self
                .payload
                .iter()
                .map(|&b| mulaw_decode(b) as f32 / PCM16_NORMALIZE)
                .collect(),
            AudioEncoding::Pcm16 => self
                .payload
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / PCM16_NORMALIZE)
                .collect(),
        }
    }

    /// Playback duration of this frame
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.payload.len())
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration().as_millis() as u64
    }

    /// RMS energy in decibels (full scale)
    pub fn energy_db(&self) -> f32 {
        energy_db(&self.to_samples())
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// RMS energy of normalized samples, in dBFS
pub fn energy_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_DB;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_squares / samples.len() as f32).sqrt();
    if rms > 0.0 {
        (20.0 * rms.log10()).max(SILENCE_DB)
    } else {
        SILENCE_DB
    }
}

/// Floor used for digital silence
pub const SILENCE_DB: f32 = -96.0;

const PCM16_NORMALIZE: f32 = 32768.0;
const PCM16_SCALE: f32 = 32767.0;

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;
const MULAW_SILENCE: u8 = 0xFF;

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16
}

/// Encode one linear sample as G.711 µ-law
pub fn mulaw_encode(sample: i16) -> u8 {
    let mut s = sample as i32;
    let sign = if s < 0 {
        s = -s;
        0x80
    } else {
        0x00
    };
    s = s.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent: i32 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (s & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (s >> (exponent + 3)) & 0x0F;

    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Decode one G.711 µ-law byte to a linear sample
pub fn mulaw_decode(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = ((u >> 4) & 0x07) as i32;
    let mantissa = (u & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_conversions() {
        assert_eq!(SampleRate::Hz8000.as_u32(), 8000);
        assert_eq!(SampleRate::Hz8000.frame_size_20ms(), 160);
        assert_eq!(SampleRate::Hz16000.frame_size_20ms(), 320);
        assert_eq!(SampleRate::from_hz(24000), Some(SampleRate::Hz24000));
        assert_eq!(SampleRate::from_hz(44100), None);
    }

    #[test]
    fn test_telephony_frame_size() {
        let format = AudioFormat::telephony();
        assert_eq!(format.frame_bytes(20), 160);
        assert_eq!(format.duration_of(160), Duration::from_millis(20));

        let pcm = AudioFormat {
            encoding: AudioEncoding::Pcm16,
            sample_rate: SampleRate::Hz16000,
        };
        assert_eq!(pcm.frame_bytes(20), 640);
    }

    #[test]
    fn test_mulaw_silence() {
        assert_eq!(mulaw_encode(0), 0xFF);
        assert_eq!(mulaw_decode(0xFF), 0);

        let frame = AudioFrame::silence(AudioFormat::telephony(), 20, 0);
        assert_eq!(frame.payload.len(), 160);
        assert!(frame.energy_db() <= SILENCE_DB);
    }

    #[test]
    fn test_mulaw_preserves_sign_and_magnitude() {
        for &sample in &[100i16, 1000, 8000, 30000, -100, -1000, -8000, -30000] {
            let decoded = mulaw_decode(mulaw_encode(sample));
            assert_eq!(decoded.signum(), sample.signum());
            // Companding error stays within a few percent
            let err = (decoded as f32 - sample as f32).abs() / sample.unsigned_abs() as f32;
            assert!(err < 0.07, "sample {} decoded to {}", sample, decoded);
        }
    }

    #[test]
    fn test_frame_sample_conversion() {
        let samples: Vec<f32> = (0..160).map(|i| (i as f32 * 0.2).sin() * 0.5).collect();
        let frame = AudioFrame::from_samples(&samples, AudioFormat::telephony(), 7);
        assert_eq!(frame.payload.len(), 160);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.duration_ms(), 20);

        let decoded = frame.to_samples();
        let max_err = samples
            .iter()
            .zip(&decoded)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 0.02);
    }

    #[test]
    fn test_energy_calculation() {
        assert!(energy_db(&[0.0; 160]) <= SILENCE_DB);
        assert!(energy_db(&[0.5; 160]) > -10.0);
        assert_eq!(energy_db(&[]), SILENCE_DB);
    }
}
