//! Block level metering

use crate::types::StereoSample;

/// RMS and peak of one rendered block
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlockLevels {
    /// `sqrt(mean(sample²))` over both channels
    pub rms: f32,
    /// `max(|sample|)` over both channels
    pub peak: f32,
}

impl BlockLevels {
    pub fn silent() -> Self {
        Self::default()
    }

    /// Measure a block; an empty block reads as silence
    pub fn measure(block: &[StereoSample]) -> Self {
        if block.is_empty() {
            return Self::silent();
        }

        let mut sum_sq = 0.0f64;
        let mut peak = 0.0f32;
        for s in block {
            sum_sq += (s.left as f64) * (s.left as f64) + (s.right as f64) * (s.right as f64);
            peak = peak.max(s.peak());
        }

        Self {
            rms: (sum_sq / (block.len() * 2) as f64).sqrt() as f32,
            peak,
        }
    }

    /// Levels limited to the 0..1 display range
    #[inline]
    pub fn clamped(self) -> Self {
        Self {
            rms: self.rms.clamp(0.0, 1.0),
            peak: self.peak.clamp(0.0, 1.0),
        }
    }
}
