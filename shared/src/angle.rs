/*!
Circular integer-degree arithmetic.

Compass headings wrap at 360, so every operation here normalises back into
`[0, 360)`. Anticlockwise means increasing degrees.
*/

use crate::protocol::DEGREES_PER_TURN;
use std::f64::consts::PI;
use std::fmt;

const TO_RADIANS: f64 = PI / 180.0;
const TO_DEGREES: f64 = 180.0 / PI;

/// An angle in whole degrees, always within `[0, 360)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AngularValue {
    degrees: i64,
}

impl AngularValue {
    /// Build from raw degrees, wrapping into range
    pub fn normalize(degrees: i64) -> Self {
        Self {
            degrees: degrees.rem_euclid(DEGREES_PER_TURN),
        }
    }

    /// Build from radians, rounded to the nearest whole degree
    pub fn from_radians(radians: f64) -> Self {
        Self::normalize((radians * TO_DEGREES).round() as i64)
    }

    pub fn degrees(self) -> i64 {
        self.degrees
    }

    pub fn radians(self) -> f64 {
        self.degrees as f64 * TO_RADIANS
    }

    /// Rotate anticlockwise by `n` degrees
    pub fn add(self, n: i64) -> Self {
        Self::normalize(self.degrees + n.rem_euclid(DEGREES_PER_TURN))
    }

    /// Rotate clockwise by `n` degrees
    pub fn sub(self, n: i64) -> Self {
        Self::normalize(self.degrees - n.rem_euclid(DEGREES_PER_TURN))
    }

    /// Anticlockwise distance needed to rotate from `self` to `other`
    pub fn diff_anticlockwise(self, other: AngularValue) -> i64 {
        Self::normalize(other.degrees + (DEGREES_PER_TURN - self.degrees)).degrees
    }

    /// Clockwise distance needed to rotate from `self` to `other`.
    ///
    /// Zero when both angles are equal, so both directions agree on the
    /// distance to self.
    pub fn diff_clockwise(self, other: AngularValue) -> i64 {
        if self == other {
            0
        } else {
            DEGREES_PER_TURN - self.diff_anticlockwise(other)
        }
    }

    /// Shortest signed distance from `self` to `other`, positive anticlockwise.
    ///
    /// Exactly opposite headings resolve to `+180`.
    pub fn signed_diff(self, other: AngularValue) -> i64 {
        let anticlockwise = self.diff_anticlockwise(other);
        if anticlockwise <= DEGREES_PER_TURN / 2 {
            anticlockwise
        } else {
            -self.diff_clockwise(other)
        }
    }
}

impl From<i64> for AngularValue {
    fn from(degrees: i64) -> Self {
        Self::normalize(degrees)
    }
}

impl fmt::Display for AngularValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(AngularValue::normalize(90).degrees(), 90);
        assert_eq!(AngularValue::normalize(360).degrees(), 0);
        assert_eq!(AngularValue::normalize(-1).degrees(), 359);
        assert_eq!(AngularValue::normalize(-721).degrees(), 359);
        assert_eq!(AngularValue::normalize(725).degrees(), 5);
    }

    #[test]
    fn test_radians() {
        assert_eq!(AngularValue::from_radians(0.0).degrees(), 0);
        assert_eq!(AngularValue::from_radians(1.0).degrees(), 57);
        assert!((AngularValue::from_radians(1.0).radians() - 0.99).abs() < 0.01);
        assert_eq!(AngularValue::from_radians(2.0).degrees(), 115);
        assert_eq!(AngularValue::from_radians(4.0).degrees(), 229);
        assert_eq!(AngularValue::from_radians(7.0).degrees(), 41);
        assert_eq!(AngularValue::from_radians(100.0).degrees(), 330);
        assert_eq!(AngularValue::from_radians(-1.0).degrees(), 303);
    }

    #[test]
    fn test_add() {
        let mut d = AngularValue::normalize(90);
        d = d.add(90);
        assert_eq!(d.degrees(), 180);
        d = d.add(180);
        assert_eq!(d.degrees(), 0);
        d = d.add(360 * 7 + 1);
        assert_eq!(d.degrees(), 1);
        d = d.add(-2);
        assert_eq!(d.degrees(), 359);
    }

    #[test]
    fn test_sub() {
        let mut d = AngularValue::normalize(90);
        d = d.sub(90);
        assert_eq!(d.degrees(), 0);
        d = d.sub(90);
        assert_eq!(d.degrees(), 270);
        d = d.sub(360 * 7);
        assert_eq!(d.degrees(), 270);
        d = d.sub(271);
        assert_eq!(d.degrees(), 359);
        d = d.sub(90 * 9);
        assert_eq!(d.degrees(), 359 - 90);
    }

    #[test]
    fn test_add_then_sub_is_identity() {
        for d in (0..360).step_by(7) {
            let start = AngularValue::normalize(d);
            for n in [0, 1, 59, 180, 359, 360, 1000, -45, -3601, i64::MAX, i64::MIN] {
                assert_eq!(start.add(n).sub(n), start, "d={} n={}", d, n);
            }
        }
    }

    #[test]
    fn test_diff_anticlockwise() {
        let d = AngularValue::normalize(341);
        assert_eq!(d.diff_anticlockwise(351.into()), 10);
        assert_eq!(d.diff_anticlockwise(0.into()), 19);
        assert_eq!(d.diff_anticlockwise(11.into()), 30);
        assert_eq!(d.diff_anticlockwise(91.into()), 110);
        assert_eq!(d.diff_anticlockwise(341.into()), 0);
        assert_eq!(d.diff_anticlockwise(331.into()), 350);
    }

    #[test]
    fn test_diff_clockwise() {
        let d = AngularValue::normalize(341);
        assert_eq!(d.diff_clockwise(351.into()), 350);
        assert_eq!(d.diff_clockwise(0.into()), 360 - 19);
        assert_eq!(d.diff_clockwise(91.into()), 360 - 110);
        assert_eq!(d.diff_clockwise(331.into()), 10);
        assert_eq!(d.diff_clockwise(341.into()), 0);
    }

    #[test]
    fn test_directional_distances_sum_to_a_turn() {
        for a in (0..360).step_by(13) {
            for b in (0..360).step_by(17) {
                let (a, b) = (AngularValue::normalize(a), AngularValue::normalize(b));
                let sum = a.diff_anticlockwise(b) + a.diff_clockwise(b);
                if a == b {
                    assert_eq!(sum, 0);
                } else {
                    assert_eq!(sum, 360, "a={} b={}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_signed_diff() {
        let centre = AngularValue::normalize(0);
        assert_eq!(centre.signed_diff(15.into()), 15);
        assert_eq!(centre.signed_diff((-25).into()), -25);
        assert_eq!(centre.signed_diff(180.into()), 180);
        assert_eq!(centre.signed_diff(181.into()), -179);
        let centre = AngularValue::normalize(350);
        assert_eq!(centre.signed_diff(5.into()), 15);
        assert_eq!(centre.signed_diff(340.into()), -10);
    }
}
