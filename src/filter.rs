//! Sample filters for the analog probe channels
//!
//! # Description
//! Every filter is seeded by the first sample it sees, so a freshly (re)initialized channel reports
//! the probe value immediately instead of slewing up from zero.

/// Second-order section coefficients, normalized so that `a0 == 1`.
#[derive(serde::Serialize, serde::Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl BiquadCoefficients {
    /// A second-order Butterworth low-pass section.
    ///
    /// # Args
    /// * `cutoff` - The cutoff frequency as a fraction of the sample rate. Must be within (0, 0.5).
    pub fn lowpass(cutoff: f32) -> Self {
        let k = libm::tanf(core::f32::consts::PI * cutoff);
        let q = core::f32::consts::FRAC_1_SQRT_2;
        let norm = 1.0 / (1.0 + k / q + k * k);
        let b0 = k * k * norm;
        Self {
            b0,
            b1: 2.0 * b0,
            b2: b0,
            a1: 2.0 * (k * k - 1.0) * norm,
            a2: (1.0 - k / q + k * k) * norm,
        }
    }
}

/// The configured filter of a probe channel.
#[derive(serde::Serialize, serde::Deserialize, Debug, Copy, Clone, PartialEq)]
pub enum FilterKind {
    /// No filtering, the raw sample is passed through.
    Bypass,

    /// Single-pole exponential moving average with the given smoothing factor in (0, 1].
    Ema(f32),

    /// A two-pole IIR section.
    Biquad(BiquadCoefficients),
}

impl FilterKind {
    pub fn is_valid(&self) -> bool {
        match self {
            FilterKind::Bypass => true,
            FilterKind::Ema(alpha) => *alpha > 0.0 && *alpha <= 1.0,
            FilterKind::Biquad(c) => [c.b0, c.b1, c.b2, c.a1, c.a2]
                .iter()
                .all(|x| x.is_finite()),
        }
    }
}

/// The running state of a probe filter.
#[derive(Debug, Copy, Clone)]
pub struct Filter {
    kind: FilterKind,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
    seeded: bool,
}

impl Filter {
    pub const fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
            seeded: false,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Change the filter response. The history is discarded and re-seeded by the next sample.
    pub fn configure(&mut self, kind: FilterKind) {
        if kind != self.kind {
            *self = Self::new(kind);
        }
    }

    /// Discard the filter history.
    pub fn reset(&mut self) {
        self.seeded = false;
    }

    /// Filter one sample.
    ///
    /// # Returns
    /// The filtered value.
    pub fn process(&mut self, x: f32) -> f32 {
        if !self.seeded {
            self.x1 = x;
            self.x2 = x;
            self.y1 = x;
            self.y2 = x;
            self.seeded = true;
            return x;
        }

        let y = match self.kind {
            FilterKind::Bypass => x,
            FilterKind::Ema(alpha) => self.y1 + alpha * (x - self.y1),
            FilterKind::Biquad(c) => {
                c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2
            }
        };

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_output() {
        let mut ema = Filter::new(FilterKind::Ema(0.1));
        assert_eq!(ema.process(2000.0), 2000.0);

        let mut biquad = Filter::new(FilterKind::Biquad(BiquadCoefficients::lowpass(0.05)));
        assert_eq!(biquad.process(2000.0), 2000.0);
    }

    #[test]
    fn ema_blends_subsequent_samples() {
        let mut ema = Filter::new(FilterKind::Ema(0.1));
        ema.process(0.0);
        assert!((ema.process(100.0) - 10.0).abs() < 1e-4);
        assert!((ema.process(100.0) - 19.0).abs() < 1e-4);

        // A reset re-seeds from the next sample.
        ema.reset();
        assert_eq!(ema.process(50.0), 50.0);
    }

    #[test]
    fn biquad_settles_to_dc_input() {
        let mut biquad = Filter::new(FilterKind::Biquad(BiquadCoefficients::lowpass(0.05)));
        biquad.process(0.0);
        let mut y = 0.0;
        for _ in 0..500 {
            y = biquad.process(1.0);
        }
        assert!((y - 1.0).abs() < 1e-3);
    }

    #[test]
    fn alpha_bounds() {
        assert!(FilterKind::Ema(1.0).is_valid());
        assert!(!FilterKind::Ema(0.0).is_valid());
        assert!(!FilterKind::Ema(1.5).is_valid());
    }
}
