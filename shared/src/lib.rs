/*!
# Shared Types and Utilities

This crate contains the sensor-side types shared by the head mouse runtime:
everything that can be computed without a thread, a serial port or a pointer.

## Core Types

- [`AngularValue`] - Circular integer-degree quantity
- [`Sample`] - One decoded sensor reading
- [`FrameSplitter`] - Delimiter-based frame accumulator
- [`AxisCalibration`] - Per-axis calibration and zone classification

## Modules

- [`angle`] - Wraparound-safe degree arithmetic
- [`sample`] - Frame decoding into typed samples
- [`framing`] - Byte stream to frame splitting
- [`zone`] - Calibrated zone classification
- [`error`] - Common error types
*/

pub mod angle;
pub mod error;
pub mod framing;
pub mod sample;
pub mod zone;

// Re-export commonly used types
pub use angle::AngularValue;
pub use error::{Result, SharedError};
pub use framing::FrameSplitter;
pub use sample::{ParseError, Sample};
pub use zone::{AxisBounds, AxisCalibration, Classification, SpeedOrigin, Zone};

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Byte terminating every frame on the wire
    pub const FRAME_DELIMITER: u8 = b':';

    /// Separator between the fields of one frame
    pub const FIELD_SEPARATOR: char = ',';

    /// Number of comma-separated fields in a well-formed frame
    pub const FIELD_COUNT: usize = 7;

    /// Longest frame accepted before the accumulated bytes are discarded
    pub const DEFAULT_MAX_FRAME_LEN: usize = 128;

    /// Degrees in one full turn
    pub const DEGREES_PER_TURN: i64 = 360;
}
