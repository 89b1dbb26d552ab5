/*!
Per-axis calibration and zone classification.

Each axis is calibrated with a centre and two half widths. A reading within
the null half width of the centre is in the dead band, a reading within the
limit half width drives the pointer, and anything further out is ignored.
Heading distances wrap at 360 degrees, vertical distances are linear.
*/

use crate::angle::AngularValue;
use crate::error::{Result, SharedError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Control state of one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    /// Pointer control is not engaged
    #[default]
    Disconnected,
    /// Beyond the limit boundary
    Inactive,
    /// Within the dead band around the centre
    NullZone,
    /// Between the null and limit boundaries
    Active,
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Zone::Disconnected => "disconnected",
            Zone::Inactive => "inactive",
            Zone::NullZone => "null",
            Zone::Active => "active",
        };
        f.write_str(name)
    }
}

/// Where the commanded speed of an `Active` axis is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedOrigin {
    /// Speed grows with the full signed offset from the centre
    #[default]
    Center,
    /// Speed grows with the distance past the null boundary
    NullBoundary,
}

/// Result of classifying one reading on one axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub zone: Zone,
    /// Signed distance from the calibration centre
    pub offset: f64,
    /// Signed distance beyond the null boundary (zero inside it)
    pub past_null: f64,
}

impl Classification {
    /// Commanded speed for this reading, `None` when the axis has no say
    pub fn speed(&self, origin: SpeedOrigin, factor: f64) -> Option<f64> {
        match self.zone {
            Zone::Disconnected | Zone::Inactive => None,
            Zone::NullZone => Some(0.0),
            Zone::Active => Some(match origin {
                SpeedOrigin::Center => self.offset * factor,
                SpeedOrigin::NullBoundary => self.past_null * factor,
            }),
        }
    }
}

/// Derived boundaries of a calibrated axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AxisBounds {
    pub min: i64,
    pub max: i64,
    pub limit_min: i64,
    pub limit_max: i64,
}

/// Calibration of one axis: `[offset, null_half_width, limit_half_width]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AxisCalibration {
    offset: i64,
    null_half_width: i64,
    limit_half_width: i64,
}

impl AxisCalibration {
    /// Create a calibration, rejecting anything but `limit >= null >= 0`
    pub fn new(offset: i64, null_half_width: i64, limit_half_width: i64) -> Result<Self> {
        if null_half_width < 0 {
            return Err(SharedError::invalid_calibration(format!(
                "null half width {} is negative",
                null_half_width
            )));
        }
        if limit_half_width < null_half_width {
            return Err(SharedError::invalid_calibration(format!(
                "limit half width {} is smaller than null half width {}",
                limit_half_width, null_half_width
            )));
        }
        Ok(Self {
            offset,
            null_half_width,
            limit_half_width,
        })
    }

    /// Build from the `[offset, w1, w2]` triple used in configuration
    pub fn from_triple(values: [i64; 3]) -> Result<Self> {
        Self::new(values[0], values[1], values[2])
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn null_half_width(&self) -> i64 {
        self.null_half_width
    }

    pub fn limit_half_width(&self) -> i64 {
        self.limit_half_width
    }

    /// Boundaries of a linear axis
    pub fn bounds(&self) -> AxisBounds {
        AxisBounds {
            min: self.offset - self.null_half_width,
            max: self.offset + self.null_half_width,
            limit_min: self.offset - self.limit_half_width,
            limit_max: self.offset + self.limit_half_width,
        }
    }

    /// Boundaries of the heading axis, wrapped into `[0, 360)`
    pub fn angular_bounds(&self) -> AxisBounds {
        let centre = AngularValue::normalize(self.offset);
        AxisBounds {
            min: centre.sub(self.null_half_width).degrees(),
            max: centre.add(self.null_half_width).degrees(),
            limit_min: centre.sub(self.limit_half_width).degrees(),
            limit_max: centre.add(self.limit_half_width).degrees(),
        }
    }

    /// Classify a signed distance from the centre. Both boundaries are inclusive.
    pub fn classify(&self, distance: f64) -> Classification {
        let magnitude = distance.abs();
        let null = self.null_half_width as f64;
        let zone = if magnitude <= null {
            Zone::NullZone
        } else if magnitude <= self.limit_half_width as f64 {
            Zone::Active
        } else {
            Zone::Inactive
        };
        let past_null = if magnitude > null {
            distance.signum() * (magnitude - null)
        } else {
            0.0
        };
        Classification {
            zone,
            offset: distance,
            past_null,
        }
    }

    /// Classify a heading, positive offsets are anticlockwise of the centre
    pub fn classify_heading(&self, heading: AngularValue) -> Classification {
        let centre = AngularValue::normalize(self.offset);
        self.classify(centre.signed_diff(heading) as f64)
    }

    /// Classify a vertical tilt, positive offsets are below the centre
    pub fn classify_vertical(&self, y: f64) -> Classification {
        self.classify(self.offset as f64 - y)
    }
}
