//! Float → 16-bit PCM conversion

use crate::audio::types::PcmFrame;

/// Convert one float sample to signed 16-bit, rounding half up.
///
/// Returns the converted value and whether it had to be clamped.
#[inline]
pub fn sample_to_i16(sample: f32) -> (i16, bool) {
    let val = (sample * 32767.0 + 0.5).floor();
    if val > i16::MAX as f32 {
        (i16::MAX, true)
    } else if val < i16::MIN as f32 {
        (i16::MIN, true)
    } else if val.is_nan() {
        (0, true)
    } else {
        (val as i16, false)
    }
}

/// Interleave `frames` samples per channel of `frame`, starting at `offset`,
/// into `out` as signed 16-bit.
///
/// `out` is cleared first. Returns `true` if any sample was clamped.
pub fn interleave_i16(frame: &PcmFrame, offset: usize, frames: usize, out: &mut Vec<i16>) -> bool {
    out.clear();
    let channels = frame.channels.len();
    if channels == 0 {
        return false;
    }
    out.reserve(frames * channels);

    let mut clipped = false;
    for i in offset..offset + frames {
        for channel in &frame.channels {
            let sample = channel.get(i).copied().unwrap_or(0.0);
            let (value, clamped) = sample_to_i16(sample);
            clipped |= clamped;
            out.push(value);
        }
    }
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_scale_values() {
        assert_eq!(sample_to_i16(1.0), (32767, false));
        assert_eq!(sample_to_i16(0.0), (0, false));
        assert_eq!(sample_to_i16(-1.0), (-32767, false));
    }

    #[test]
    fn test_overflow_is_clamped_and_flagged() {
        assert_eq!(sample_to_i16(1.5), (32767, true));
        assert_eq!(sample_to_i16(-1.5), (-32768, true));
        assert_eq!(sample_to_i16(f32::INFINITY), (32767, true));
        assert_eq!(sample_to_i16(f32::NEG_INFINITY), (-32768, true));
    }

    #[test]
    fn test_nan_becomes_silence() {
        assert_eq!(sample_to_i16(f32::NAN), (0, true));
    }

    #[test]
    fn test_interleave_stereo() {
        let frame = PcmFrame::new(vec![vec![0.0, 1.0, 2.0], vec![0.5, -1.0, -2.0]]);
        let mut out = Vec::new();
        let clipped = interleave_i16(&frame, 1, 2, &mut out);
        assert!(clipped);
        assert_eq!(out, vec![32767, -32767, 32767, -32768]);
    }
}
