//! Calibration transforms for mapping probe voltages into physical units

/// A structure for mapping values between two different domains.
#[derive(serde::Serialize, serde::Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct LinearTransformation {
    pub slope: f32,
    pub offset: f32,
}

impl LinearTransformation {
    /// Construct a new linear transformation.
    ///
    /// # Args
    /// * `slope` - The slope of the y = mx + b equation.
    /// * `offset` - The y-intercept. Equals the b portion of y = mx + b.
    pub const fn new(slope: f32, offset: f32) -> Self {
        LinearTransformation { slope, offset }
    }

    /// Map a value from the X-domain into the Y-domain using a linear equation.
    ///
    /// # Args
    /// * `horizontal` - The X-axis value to map into the Y-axis.
    pub fn map(&self, horizontal: f32) -> f32 {
        horizontal * self.slope + self.offset
    }

    /// Check that the transformation can be used as a probe calibration.
    pub fn is_valid(&self) -> bool {
        self.slope.is_finite() && self.offset.is_finite() && self.slope > 0.0
    }
}

/// A third-order polynomial `y = a + b*x + c*x^2 + d*x^3`.
///
/// # Note
/// Used both for the thermistor calibration curve and for the current ramp segments, where `x` is
/// the normalized progress through the segment.
#[derive(serde::Serialize, serde::Deserialize, Debug, Copy, Clone, PartialEq, Default)]
pub struct Cubic {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
}

impl Cubic {
    pub const fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self { a, b, c, d }
    }

    /// Evaluate the polynomial at `x`.
    pub fn evaluate(&self, x: f32) -> f32 {
        // Horner form.
        ((self.d * x + self.c) * x + self.b) * x + self.a
    }

    pub fn is_finite(&self) -> bool {
        self.a.is_finite() && self.b.is_finite() && self.c.is_finite() && self.d.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_map() {
        let transform = LinearTransformation::new(200.0, 5.0);
        assert_eq!(transform.map(0.5), 105.0);
        assert_eq!(transform.map(-0.5), -95.0);
        assert!(transform.is_valid());
        assert!(!LinearTransformation::new(0.0, 0.0).is_valid());
        assert!(!LinearTransformation::new(-1.0, 0.0).is_valid());
        assert!(!LinearTransformation::new(f32::NAN, 0.0).is_valid());
    }

    #[test]
    fn cubic_evaluation() {
        let ramp = Cubic::new(0.0, 0.0, 0.0, 100.0);
        assert_eq!(ramp.evaluate(0.0), 0.0);
        assert_eq!(ramp.evaluate(0.5), 12.5);
        assert_eq!(ramp.evaluate(1.0), 100.0);

        let thermistor = Cubic::new(-7.22, 121.0, -69.3, 18.4);
        let expected = -7.22 + 121.0 * 1.2 - 69.3 * 1.44 + 18.4 * 1.728;
        assert!((thermistor.evaluate(1.2) - expected).abs() < 1e-3);
    }
}
