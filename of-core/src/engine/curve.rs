//! Temperature to PWM curve model
//!
//! A curve is a list of `temperature=pwm` control points, kept sorted by
//! temperature with at most one point per temperature.
//!
//! # How It Works
//!
//! 1. **Parsing**: `"45=25, 65=55, 70=100"` style text. Malformed segments
//!    are dropped rather than rejected, so a partially valid curve still
//!    drives the fan.
//!
//! 2. **Evaluation**: below the first point the first PWM holds, above the
//!    last point the last PWM holds, in between the value is linearly
//!    interpolated and rounded half-to-even.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::limits;

/// One control point of a curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Temperature in °C
    pub temperature: f64,
    /// Duty cycle 0-100
    pub pwm: u8,
}

impl CurvePoint {
    pub fn new(temperature: f64, pwm: u8) -> Self {
        Self {
            temperature,
            pwm: pwm.min(limits::PWM_MAX),
        }
    }
}

/// Piecewise-linear temperature to PWM curve
///
/// Serialized as its text form so option files stay human editable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Curve {
    points: Vec<CurvePoint>,
}

impl Curve {
    /// Parse curve text leniently
    ///
    /// Segments without `=`, with a non-numeric or non-finite temperature,
    /// or with a non-integer PWM are skipped. PWM values are clamped to
    /// 0-100. When a temperature repeats, the later segment wins.
    pub fn parse(text: &str) -> Self {
        let points = text
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .filter_map(parse_point)
            .collect();
        Self::from_points(points)
    }

    /// Build a curve from arbitrary points, sorting and de-duplicating
    pub fn from_points(mut points: Vec<CurvePoint>) -> Self {
        points.retain(|p| p.temperature.is_finite());
        // Stable sort keeps input order among equal temperatures
        points.sort_by(|a, b| a.temperature.total_cmp(&b.temperature));

        let mut unique: Vec<CurvePoint> = Vec::with_capacity(points.len());
        for point in points {
            match unique.last_mut() {
                Some(last) if last.temperature == point.temperature => *last = point,
                _ => unique.push(point),
            }
        }
        Self { points: unique }
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Target PWM for a temperature, or `None` for an empty curve
    pub fn evaluate(&self, temp: f64) -> Option<u8> {
        interpolate(&self.points, temp)
    }
}

fn parse_point(part: &str) -> Option<CurvePoint> {
    let (temp, pwm) = part.split_once('=')?;
    let temperature: f64 = temp.trim().parse().ok()?;
    if !temperature.is_finite() {
        return None;
    }
    let pwm: i64 = pwm.trim().parse().ok()?;
    Some(CurvePoint::new(temperature, pwm.clamp(0, 100) as u8))
}

/// Evaluate sorted control points at `temp`
///
/// Accepts point lists that were not de-duplicated: a zero-width segment
/// yields the larger of its two PWM values.
pub fn interpolate(points: &[CurvePoint], temp: f64) -> Option<u8> {
    let first = points.first()?;
    let last = points.last()?;

    if temp <= first.temperature {
        return Some(first.pwm.min(limits::PWM_MAX));
    }
    if temp >= last.temperature {
        return Some(last.pwm.min(limits::PWM_MAX));
    }

    for pair in points.windows(2) {
        let (lower, upper) = (&pair[0], &pair[1]);
        if temp < lower.temperature || temp > upper.temperature {
            continue;
        }
        if upper.temperature == lower.temperature {
            return Some(lower.pwm.max(upper.pwm).min(limits::PWM_MAX));
        }
        let ratio = (temp - lower.temperature) / (upper.temperature - lower.temperature);
        let value = f64::from(lower.pwm) + (f64::from(upper.pwm) - f64::from(lower.pwm)) * ratio;
        return Some(value.round_ties_even().clamp(0.0, 100.0) as u8);
    }

    // Unsorted input can fall through every segment
    Some(first.pwm.min(limits::PWM_MAX))
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, point) in self.points.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", point.temperature, point.pwm)?;
        }
        Ok(())
    }
}

impl From<String> for Curve {
    fn from(text: String) -> Self {
        Self::parse(&text)
    }
}

impl From<&str> for Curve {
    fn from(text: &str) -> Self {
        Self::parse(text)
    }
}

impl From<Curve> for String {
    fn from(curve: Curve) -> Self {
        curve.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_curve() -> Curve {
        Curve::parse("45=25, 65=55, 70=100")
    }

    #[test]
    fn test_parse_sorts_and_trims() {
        let curve = Curve::parse(" 70=100 ,45=25,  65=55 ");
        let temps: Vec<f64> = curve.points().iter().map(|p| p.temperature).collect();
        assert_eq!(temps, vec![45.0, 65.0, 70.0]);
    }

    #[test]
    fn test_parse_drops_malformed_segments() {
        let curve = Curve::parse("45=25, garbage, x=10, 50=abc, 55=12.5, 60=, =40, 65=55");
        assert_eq!(curve.len(), 2);
        assert_eq!(curve.points()[0], CurvePoint::new(45.0, 25));
        assert_eq!(curve.points()[1], CurvePoint::new(65.0, 55));
    }

    #[test]
    fn test_parse_rejects_non_finite_temperature() {
        let curve = Curve::parse("nan=10, inf=20, 40=30");
        assert_eq!(curve.len(), 1);
    }

    #[test]
    fn test_parse_clamps_pwm() {
        let curve = Curve::parse("30=-5, 80=250");
        assert_eq!(curve.points()[0].pwm, 0);
        assert_eq!(curve.points()[1].pwm, 100);
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(Curve::parse("").is_empty());
        assert!(Curve::parse("   ").is_empty());
        assert!(Curve::parse(",,").is_empty());
    }

    #[test]
    fn test_duplicate_temperature_last_wins() {
        let curve = Curve::parse("50=30, 40=20, 50=60");
        assert_eq!(curve.len(), 2);
        assert_eq!(curve.points()[1], CurvePoint::new(50.0, 60));
    }

    #[test]
    fn test_evaluate_interpolates_and_rounds() {
        assert_eq!(default_curve().evaluate(55.0), Some(40));
        // 25 + 30 * 0.25 = 32.5 rounds to even
        assert_eq!(default_curve().evaluate(50.0), Some(32));
        // 55 + 45 * 0.5 = 77.5 rounds to even
        assert_eq!(default_curve().evaluate(67.5), Some(78));
    }

    #[test]
    fn test_evaluate_clamps_outside_range() {
        let curve = default_curve();
        assert_eq!(curve.evaluate(-10.0), Some(25));
        assert_eq!(curve.evaluate(45.0), Some(25));
        assert_eq!(curve.evaluate(70.0), Some(100));
        assert_eq!(curve.evaluate(120.0), Some(100));
    }

    #[test]
    fn test_evaluate_at_points() {
        assert_eq!(default_curve().evaluate(65.0), Some(55));
    }

    #[test]
    fn test_evaluate_monotonic() {
        let curve = default_curve();
        let mut previous = 0;
        let mut temp = 30.0;
        while temp <= 80.0 {
            let value = curve.evaluate(temp).unwrap_or_default();
            assert!(value >= previous, "dropped at {temp}");
            previous = value;
            temp += 0.25;
        }
    }

    #[test]
    fn test_evaluate_empty_is_none() {
        assert_eq!(Curve::default().evaluate(50.0), None);
    }

    #[test]
    fn test_undeduplicated_points() {
        let points = [
            CurvePoint::new(40.0, 20),
            CurvePoint::new(50.0, 30),
            CurvePoint::new(50.0, 70),
            CurvePoint::new(60.0, 80),
        ];
        assert_eq!(interpolate(&points, 50.0), Some(30));
        // First bracketing segment is 40..50, so midway uses it
        assert_eq!(interpolate(&points, 45.0), Some(25));
    }

    #[test]
    fn test_display_round_trips_text() {
        let curve = Curve::parse("45=25,65.5=55");
        assert_eq!(curve.to_string(), "45=25, 65.5=55");
        assert_eq!(Curve::parse(&curve.to_string()), curve);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&default_curve()).unwrap();
        assert_eq!(json, "\"45=25, 65=55, 70=100\"");
        let back: Curve = serde_json::from_str(&json).unwrap();
        assert_eq!(back, default_curve());
    }
}
