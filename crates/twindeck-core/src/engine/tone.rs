//! Three-band tone shaper
//!
//! Low shelf, mid peak and high shelf biquads applied in that order. Band
//! gains are in dB; a band at 0 dB is bypassed so a flat shaper leaves the
//! signal bit-exact.

use crate::types::StereoSample;

/// Low shelf corner frequency
pub const LOW_SHELF_FREQ: f32 = 250.0;
/// Mid peak center frequency
pub const MID_PEAK_FREQ: f32 = 1000.0;
/// High shelf corner frequency
pub const HIGH_SHELF_FREQ: f32 = 4000.0;
/// Q shared by all three bands
pub const BAND_Q: f32 = 1.0;

/// Gains within this many dB of zero count as flat
const FLAT_DB: f32 = 1e-3;

/// Biquad filter state for one band, both channels
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1_l: f32, x2_l: f32, y1_l: f32, y2_l: f32,
    x1_r: f32, x2_r: f32, y1_r: f32, y2_r: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: StereoSample, c: &BiquadCoeffs) -> StereoSample {
        let out_l = c.b0 * input.left + c.b1 * self.x1_l + c.b2 * self.x2_l
                  - c.a1 * self.y1_l - c.a2 * self.y2_l;
        self.x2_l = self.x1_l;
        self.x1_l = input.left;
        self.y2_l = self.y1_l;
        self.y1_l = out_l;

        let out_r = c.b0 * input.right + c.b1 * self.x1_r + c.b2 * self.x2_r
                  - c.a1 * self.y1_r - c.a2 * self.y2_r;
        self.x2_r = self.x1_r;
        self.x1_r = input.right;
        self.y2_r = self.y1_r;
        self.y1_r = out_r;

        StereoSample::new(out_l, out_r)
    }
}

/// Normalized biquad coefficients (a0 = 1)
#[derive(Debug, Clone, Copy, PartialEq)]
struct BiquadCoeffs {
    b0: f32, b1: f32, b2: f32,
    a1: f32, a2: f32,
}

/// Shared intermediates of the shelf/peak designs
struct Design {
    a: f32,
    cos_w0: f32,
    alpha: f32,
}

impl Design {
    fn new(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        // Keep the corner below Nyquist at low render rates
        let freq = freq.min(sample_rate * 0.45);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        Self {
            a: 10.0_f32.powf(gain_db / 40.0),
            cos_w0: w0.cos(),
            alpha: w0.sin() / (2.0 * q),
        }
    }
}

impl BiquadCoeffs {
    fn low_shelf(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let Design { a, cos_w0, alpha } = Design::new(freq, gain_db, q, sample_rate);
        let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a_alpha)) / a0,
            b1: (2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a_alpha)) / a0,
            a1: (-2.0 * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a_alpha) / a0,
        }
    }

    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let Design { a, cos_w0, alpha } = Design::new(freq, gain_db, q, sample_rate);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }

    fn high_shelf(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let Design { a, cos_w0, alpha } = Design::new(freq, gain_db, q, sample_rate);
        let sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        let a0 = (a + 1.0) - (a - 1.0) * cos_w0 + sqrt_a_alpha;
        Self {
            b0: (a * ((a + 1.0) + (a - 1.0) * cos_w0 + sqrt_a_alpha)) / a0,
            b1: (-2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0)) / a0,
            b2: (a * ((a + 1.0) + (a - 1.0) * cos_w0 - sqrt_a_alpha)) / a0,
            a1: (2.0 * ((a - 1.0) - (a + 1.0) * cos_w0)) / a0,
            a2: ((a + 1.0) - (a - 1.0) * cos_w0 - sqrt_a_alpha) / a0,
        }
    }

    fn passthrough() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BandKind {
    LowShelf,
    Peak,
    HighShelf,
}

/// One filter band with its cached design
#[derive(Debug, Clone)]
struct Band {
    kind: BandKind,
    freq: f32,
    gain_db: f32,
    coeffs: BiquadCoeffs,
    state: BiquadState,
    active: bool,
}

impl Band {
    fn new(kind: BandKind, freq: f32) -> Self {
        Self {
            kind,
            freq,
            gain_db: 0.0,
            coeffs: BiquadCoeffs::passthrough(),
            state: BiquadState::default(),
            active: false,
        }
    }

    fn design(&mut self, gain_db: f32, sample_rate: f32) {
        self.gain_db = gain_db;
        let active = gain_db.abs() >= FLAT_DB;
        if active && !self.active {
            // Start from rest instead of stale history
            self.state = BiquadState::default();
        }
        self.active = active;
        self.coeffs = if active {
            match self.kind {
                BandKind::LowShelf => BiquadCoeffs::low_shelf(self.freq, gain_db, BAND_Q, sample_rate),
                BandKind::Peak => BiquadCoeffs::peaking(self.freq, gain_db, BAND_Q, sample_rate),
                BandKind::HighShelf => BiquadCoeffs::high_shelf(self.freq, gain_db, BAND_Q, sample_rate),
            }
        } else {
            BiquadCoeffs::passthrough()
        };
    }

    #[inline]
    fn process(&mut self, buffer: &mut [StereoSample]) {
        if !self.active {
            return;
        }
        for sample in buffer.iter_mut() {
            *sample = self.state.process(*sample, &self.coeffs);
        }
    }
}

/// Low → mid → high filter cascade for one deck
#[derive(Debug, Clone)]
pub struct ToneShaper {
    sample_rate: f32,
    bands: [Band; 3],
}

impl ToneShaper {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1) as f32,
            bands: [
                Band::new(BandKind::LowShelf, LOW_SHELF_FREQ),
                Band::new(BandKind::Peak, MID_PEAK_FREQ),
                Band::new(BandKind::HighShelf, HIGH_SHELF_FREQ),
            ],
        }
    }

    /// Redesign every band for a new render rate and clear filter history
    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1) as f32;
        for band in &mut self.bands {
            band.state = BiquadState::default();
            let gain_db = band.gain_db;
            band.design(gain_db, self.sample_rate);
        }
    }

    /// Update band gains, recomputing only the bands that changed
    ///
    /// Allocation free; safe to call once per render block.
    pub fn set_gains(&mut self, low_db: f32, mid_db: f32, high_db: f32) {
        for (band, gain_db) in self.bands.iter_mut().zip([low_db, mid_db, high_db]) {
            if band.gain_db != gain_db {
                band.design(gain_db, self.sample_rate);
            }
        }
    }

    /// Current (low, mid, high) gains in dB
    pub fn gains(&self) -> (f32, f32, f32) {
        (self.bands[0].gain_db, self.bands[1].gain_db, self.bands[2].gain_db)
    }

    /// Whether any band alters the signal
    pub fn is_flat(&self) -> bool {
        self.bands.iter().all(|b| !b.active)
    }

    pub fn process(&mut self, buffer: &mut [StereoSample]) {
        for band in &mut self.bands {
            band.process(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<StereoSample> {
        (0..len)
            .map(|i| {
                let v = (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin() * 0.5;
                StereoSample::mono(v)
            })
            .collect()
    }

    fn steady_peak(buffer: &[StereoSample]) -> f32 {
        buffer[buffer.len() / 2..]
            .iter()
            .map(|s| s.peak())
            .fold(0.0, f32::max)
    }

    #[test]
    fn test_flat_shaper_is_bit_exact() {
        let mut shaper = ToneShaper::new(44100);
        shaper.set_gains(0.0, 0.0, 0.0);
        assert!(shaper.is_flat());

        let input = sine(440.0, 44100.0, 256);
        let mut buffer = input.clone();
        shaper.process(&mut buffer);
        assert_eq!(buffer, input);
    }

    #[test]
    fn test_low_cut_attenuates_bass() {
        let mut shaper = ToneShaper::new(44100);
        shaper.set_gains(-20.0, 0.0, 0.0);

        let mut buffer = sine(50.0, 44100.0, 8820);
        shaper.process(&mut buffer);
        // -20 dB shelf leaves roughly a tenth of the input well below the corner
        assert!(steady_peak(&buffer) < 0.5 * 0.2);
    }

    #[test]
    fn test_high_boost_leaves_bass_alone() {
        let mut shaper = ToneShaper::new(44100);
        shaper.set_gains(0.0, 0.0, 12.0);

        let mut buffer = sine(60.0, 44100.0, 8820);
        shaper.process(&mut buffer);
        let peak = steady_peak(&buffer);
        assert!((peak - 0.5).abs() < 0.05, "peak was {}", peak);
    }

    #[test]
    fn test_mid_boost_raises_center_frequency() {
        let mut shaper = ToneShaper::new(44100);
        shaper.set_gains(0.0, 6.0, 0.0);

        let mut buffer = sine(MID_PEAK_FREQ, 44100.0, 8820);
        shaper.process(&mut buffer);
        // +6 dB is about double amplitude at the center
        assert!(steady_peak(&buffer) > 0.9);
    }

    #[test]
    fn test_set_gains_reports_back() {
        let mut shaper = ToneShaper::new(48000);
        shaper.set_gains(3.0, -4.0, 5.0);
        assert_eq!(shaper.gains(), (3.0, -4.0, 5.0));
        shaper.prepare(44100);
        assert_eq!(shaper.gains(), (3.0, -4.0, 5.0));
        assert!(!shaper.is_flat());
    }
}
