/*!
Sensor sample decoding.

A frame is seven comma separated ASCII fields:
`x, y, heading, button_a_sensor, button_b_sensor, button_a_receiver, button_b_receiver`.
Numbers are decimal text; a boolean is true when its field starts with `1`.
*/

use crate::protocol::{FIELD_COUNT, FIELD_SEPARATOR, FRAME_DELIMITER};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SERIES_X: usize = 0;
const SERIES_Y: usize = 1;
const SERIES_HEADING: usize = 2;
const SERIES_BUTTON_A_SENSOR: usize = 3;
const SERIES_BUTTON_B_SENSOR: usize = 4;
const SERIES_BUTTON_A_RECEIVER: usize = 5;
const SERIES_BUTTON_B_RECEIVER: usize = 6;

/// Errors that can occur while decoding a frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected {expected} comma separated fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field '{field}' is not a number: '{value}'")]
    NotANumber { field: &'static str, value: String },
}

/// One decoded sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Lateral tilt
    pub x: f64,
    /// Vertical tilt (pitch), after orientation mirroring
    pub y: f64,
    /// Compass heading rounded to whole degrees
    pub heading: i64,
    pub button_a_sensor: bool,
    pub button_b_sensor: bool,
    pub button_a_receiver: bool,
    pub button_b_receiver: bool,
    /// Capture time at decode
    pub timestamp: DateTime<Local>,
}

impl Sample {
    /// Decode one frame.
    ///
    /// `swap_ud` negates `y` first. `swap_lr` then selects the mounting: when
    /// set the sensor buttons are taken as they arrive and `y` is kept; when
    /// clear the sensor buttons trade places and `y` is negated again. The
    /// button and axis mirroring share the one flag because both follow from
    /// which way round the sensor is worn.
    pub fn parse(frame: &str, swap_lr: bool, swap_ud: bool) -> Result<Sample, ParseError> {
        let frame = frame
            .trim()
            .trim_end_matches(FRAME_DELIMITER as char)
            .trim_end();
        let values: Vec<&str> = frame.split(FIELD_SEPARATOR).collect();
        if values.len() != FIELD_COUNT {
            return Err(ParseError::FieldCount {
                expected: FIELD_COUNT,
                found: values.len(),
            });
        }

        let x = parse_num(values[SERIES_X], "x")?;
        let mut y = parse_num(values[SERIES_Y], "y")?;
        let heading = parse_num(values[SERIES_HEADING], "heading")?;
        let sensor_a = parse_bool(values[SERIES_BUTTON_A_SENSOR]);
        let sensor_b = parse_bool(values[SERIES_BUTTON_B_SENSOR]);

        if swap_ud {
            y = -y;
        }
        let (button_a_sensor, button_b_sensor, y) = if swap_lr {
            (sensor_a, sensor_b, y)
        } else {
            (sensor_b, sensor_a, -y)
        };

        Ok(Sample {
            x,
            y,
            heading: heading.round() as i64,
            button_a_sensor,
            button_b_sensor,
            button_a_receiver: parse_bool(values[SERIES_BUTTON_A_RECEIVER]),
            button_b_receiver: parse_bool(values[SERIES_BUTTON_B_RECEIVER]),
            timestamp: Local::now(),
        })
    }
}

fn parse_num(value: &str, field: &'static str) -> Result<f64, ParseError> {
    match value.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(ParseError::NotANumber {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_bool(value: &str) -> bool {
    value.trim().starts_with('1')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integers() {
        let s = Sample::parse("10,143,1,1,0,1,0", true, false).unwrap();
        assert_eq!(s.x, 10.0);
        assert_eq!(s.y, 143.0);
        assert_eq!(s.heading, 1);
        assert!(s.button_a_sensor);
        assert!(!s.button_b_sensor);
        assert!(s.button_a_receiver);
        assert!(!s.button_b_receiver);
    }

    #[test]
    fn test_parse_decimals_and_rounding() {
        let s = Sample::parse("10.456, 143.99 ,20.5,0,0,0,1", true, false).unwrap();
        assert_eq!(s.x, 10.456);
        assert_eq!(s.y, 143.99);
        assert_eq!(s.heading, 21);
        assert!(s.button_b_receiver);

        let s = Sample::parse("-0.5,0,-25.4,0,0,0,0", true, false).unwrap();
        assert_eq!(s.x, -0.5);
        assert_eq!(s.heading, -25);
    }

    #[test]
    fn test_trailing_delimiter_is_ignored() {
        let s = Sample::parse("0,25,15,0,1,1,1:", true, true).unwrap();
        assert_eq!(s.heading, 15);
        assert!(s.button_b_receiver);
    }

    #[test]
    fn test_swap_lr_keeps_buttons_and_y() {
        let s = Sample::parse("0,25,15,1,0,0,0", true, false).unwrap();
        assert!(s.button_a_sensor);
        assert!(!s.button_b_sensor);
        assert_eq!(s.y, 25.0);
    }

    #[test]
    fn test_no_swap_mirrors_buttons_and_y() {
        let s = Sample::parse("0,25,15,1,0,0,0", false, false).unwrap();
        assert!(!s.button_a_sensor);
        assert!(s.button_b_sensor);
        assert_eq!(s.y, -25.0);
    }

    #[test]
    fn test_swap_ud_negates_before_mirroring() {
        let s = Sample::parse("0,25,15,0,0,0,0", true, true).unwrap();
        assert_eq!(s.y, -25.0);
        let s = Sample::parse("0,25,15,0,0,0,0", false, true).unwrap();
        assert_eq!(s.y, 25.0);
    }

    #[test]
    fn test_field_count_errors() {
        for frame in [
            "",
            "10,143,-2,-16,20,1",
            ",143,-2,-16,1,0",
            "10,143,0,0,20,1,0,",
            "1,2,3,4,5,6,7,8,9",
        ] {
            match Sample::parse(frame, true, false) {
                Err(ParseError::FieldCount { expected: 7, .. }) => {}
                other => panic!("{:?} gave {:?}", frame, other),
            }
        }
    }

    #[test]
    fn test_not_a_number_errors() {
        let err = Sample::parse("10,143,-2a,0,0,1,0", true, false).unwrap_err();
        assert_eq!(
            err,
            ParseError::NotANumber {
                field: "heading",
                value: "-2a".to_string()
            }
        );
        let err = Sample::parse(",143,2,0,0,1,0", true, false).unwrap_err();
        assert!(matches!(err, ParseError::NotANumber { field: "x", .. }));
        let err = Sample::parse("1,NaN,2,0,0,1,0", true, false).unwrap_err();
        assert!(matches!(err, ParseError::NotANumber { field: "y", .. }));
    }

    #[test]
    fn test_boolean_fields_only_check_prefix() {
        let s = Sample::parse("0,0,0,1x,10,01,yes", true, false).unwrap();
        assert!(s.button_a_sensor);
        assert!(s.button_b_sensor);
        assert!(!s.button_a_receiver);
        assert!(!s.button_b_receiver);
    }

    #[test]
    fn test_sample_serializes_to_json() {
        let s = Sample::parse("1,2,3,0,1,0,0", true, false).unwrap();
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["heading"], 3);
        assert_eq!(json["button_b_sensor"], true);
        assert!(json["timestamp"].is_string());
    }
}
