//! Variable-speed resampling
//!
//! Reads a track's native-rate frames at a fractional position and steps
//! through them at `speed * native_rate / render_rate` frames per output
//! frame. That single ratio covers both sample-rate conversion and the deck
//! speed control. Pitch follows speed, there is no time-stretching.
//!
//! ## Interpolation Methods
//!
//! - **Linear**: Interpolates between 2 adjacent frames.
//! - **Cubic**: Catmull-Rom spline through 4 frames.

use serde::{Deserialize, Serialize};

use crate::types::StereoSample;

/// Offsets closer than this to a whole frame read that frame verbatim
const INTEGER_SNAP: f64 = 1e-6;

/// Interpolation method for variable-speed playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Linear interpolation (2-point)
    Linear,
    /// Cubic Catmull-Rom interpolation (4-point)
    #[default]
    Cubic,
}

#[inline]
fn lerp_sample(s0: StereoSample, s1: StereoSample, t: f32) -> StereoSample {
    StereoSample {
        left: s0.left + (s1.left - s0.left) * t,
        right: s0.right + (s1.right - s0.right) * t,
    }
}

#[inline]
fn cubic_interpolate(
    s0: StereoSample,
    s1: StereoSample,
    s2: StereoSample,
    s3: StereoSample,
    t: f32,
) -> StereoSample {
    let t2 = t * t;
    let t3 = t2 * t;

    // Catmull-Rom basis (tension 0.5)
    let c0 = -0.5 * t3 + t2 - 0.5 * t;
    let c1 = 1.5 * t3 - 2.5 * t2 + 1.0;
    let c2 = -1.5 * t3 + 2.0 * t2 + 0.5 * t;
    let c3 = 0.5 * t3 - 0.5 * t2;

    StereoSample {
        left: s0.left * c0 + s1.left * c1 + s2.left * c2 + s3.left * c3,
        right: s0.right * c0 + s1.right * c1 + s2.right * c2 + s3.right * c3,
    }
}

/// Frame at `index`, silence outside the source
#[inline]
fn frame_at(data: &[StereoSample], index: i64) -> StereoSample {
    if index < 0 || index >= data.len() as i64 {
        StereoSample::silence()
    } else {
        data[index as usize]
    }
}

/// Read one frame at a fractional source position
pub fn read_interpolated(
    data: &[StereoSample],
    position: f64,
    method: InterpolationMethod,
) -> StereoSample {
    if data.is_empty() || !position.is_finite() {
        return StereoSample::silence();
    }

    let nearest = position.round();
    if (position - nearest).abs() < INTEGER_SNAP {
        return frame_at(data, nearest as i64);
    }

    let index = position.floor() as i64;
    let frac = (position - position.floor()) as f32;

    match method {
        InterpolationMethod::Linear => {
            lerp_sample(frame_at(data, index), frame_at(data, index + 1), frac)
        }
        InterpolationMethod::Cubic => cubic_interpolate(
            frame_at(data, index - 1),
            frame_at(data, index),
            frame_at(data, index + 1),
            frame_at(data, index + 2),
            frac,
        ),
    }
}

/// Per-deck resampler
#[derive(Debug, Clone, Copy, Default)]
pub struct Resampler {
    method: InterpolationMethod,
}

impl Resampler {
    pub fn new(method: InterpolationMethod) -> Self {
        Self { method }
    }

    /// Source frames consumed per output frame
    #[inline]
    pub fn step(speed: f32, native_rate: u32, render_rate: u32) -> f64 {
        speed as f64 * native_rate as f64 / render_rate.max(1) as f64
    }

    /// Fill `out` starting at source frame `start`, advancing by `step`
    ///
    /// Positions past either end of `source` produce silence.
    pub fn fill(&self, source: &[StereoSample], start: f64, step: f64, out: &mut [StereoSample]) {
        for (i, frame) in out.iter_mut().enumerate() {
            *frame = read_interpolated(source, start + i as f64 * step, self.method);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<StereoSample> {
        (0..len).map(|i| StereoSample::mono(i as f32)).collect()
    }

    #[test]
    fn test_linear_interpolation() {
        let data = ramp(4);
        let s = read_interpolated(&data, 1.25, InterpolationMethod::Linear);
        assert!((s.left - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_cubic_on_linear_ramp_is_exact() {
        let data = ramp(8);
        let s = read_interpolated(&data, 3.5, InterpolationMethod::Cubic);
        assert!((s.left - 3.5).abs() < 1e-5);
    }

    #[test]
    fn test_integer_positions_are_bit_exact() {
        let data: Vec<_> = (0..16).map(|i| StereoSample::new((i as f32).sin(), -0.3)).collect();
        let resampler = Resampler::new(InterpolationMethod::Cubic);
        let mut out = vec![StereoSample::silence(); 8];
        resampler.fill(&data, 4.0, 1.0, &mut out);
        assert_eq!(&out[..], &data[4..12]);
    }

    #[test]
    fn test_reads_past_end_are_silent() {
        let data = ramp(4);
        let resampler = Resampler::new(InterpolationMethod::Linear);
        let mut out = vec![StereoSample::mono(9.0); 4];
        resampler.fill(&data, 3.0, 1.0, &mut out);
        assert_eq!(out[0].left, 3.0);
        assert!(out[1..].iter().all(|s| *s == StereoSample::silence()));
    }

    #[test]
    fn test_step_combines_speed_and_rate() {
        assert_eq!(Resampler::step(1.0, 44100, 44100), 1.0);
        assert_eq!(Resampler::step(2.0, 22050, 44100), 1.0);
        assert!((Resampler::step(0.5, 48000, 44100) - 0.5442).abs() < 1e-3);
    }
}
