/*!
Host pointer access.

[`PointerDevice`] is the narrow contract the actuator thread drives: absolute
moves, position queries and button press/release. Two backends exist:

- [`VirtualPointer`] keeps the pointer in memory. Used for `--dry-run` and
  whenever the binary is built without the `native-pointer` feature.
- `NativePointer` (feature `native-pointer`) forwards to the host
  synthetic-input API through `enigo`.

Backends are created on the actuator thread, so they do not need to be `Send`.
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Pointer backend errors
#[derive(Error, Debug)]
pub enum PointerError {
    /// The backend could not be created
    #[error("Pointer backend unavailable: {0}")]
    Unavailable(String),

    /// A native call was rejected by the host
    #[error("Pointer call failed: {0}")]
    Call(String),

    /// The actuator thread could not be started
    #[error("Actuator thread failed to start: {0}")]
    Spawn(String),
}

impl PointerError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn call(msg: impl Into<String>) -> Self {
        Self::Call(msg.into())
    }
}

pub type PointerResult<T> = std::result::Result<T, PointerError>;

/// Physical mouse buttons driven by the actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
}

impl MouseButton {
    pub const ALL: [MouseButton; 2] = [MouseButton::Left, MouseButton::Right];

    pub fn index(self) -> usize {
        match self {
            MouseButton::Left => 0,
            MouseButton::Right => 1,
        }
    }
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MouseButton::Left => f.write_str("left"),
            MouseButton::Right => f.write_str("right"),
        }
    }
}

/// Integer screen position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Screen area the pointer is confined to. The last usable pixel is
/// `x + width - 1`, `y + height - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn max_x(&self) -> i32 {
        self.x + self.width.max(1) - 1
    }

    pub fn max_y(&self) -> i32 {
        self.y + self.height.max(1) - 1
    }

    pub fn centre(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Clamp a fractional position into the rectangle
    pub fn clamp(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x.clamp(self.x as f64, self.max_x() as f64),
            y.clamp(self.y as f64, self.max_y() as f64),
        )
    }
}

/// Host pointer-mover contract
pub trait PointerDevice {
    /// Move the pointer to an absolute screen position
    fn move_absolute(&mut self, to: Point) -> PointerResult<()>;

    /// Where the host currently has the pointer
    fn query_position(&mut self) -> PointerResult<Point>;

    fn press_button(&mut self, button: MouseButton) -> PointerResult<()>;

    fn release_button(&mut self, button: MouseButton) -> PointerResult<()>;

    /// Size of the main display in pixels
    fn screen_size(&mut self) -> PointerResult<(i32, i32)>;
}

/// Selects the backend built by [`PointerBackend::create`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerBackend {
    Virtual { width: i32, height: i32 },
    Native,
}

impl PointerBackend {
    /// Construct the backend. Call on the thread that will own it.
    pub fn create(self) -> PointerResult<Box<dyn PointerDevice>> {
        match self {
            PointerBackend::Virtual { width, height } => {
                Ok(Box::new(VirtualPointer::new(width, height)))
            }
            #[cfg(feature = "native-pointer")]
            PointerBackend::Native => Ok(Box::new(native::NativePointer::new()?)),
            #[cfg(not(feature = "native-pointer"))]
            PointerBackend::Native => Err(PointerError::unavailable(
                "built without the native-pointer feature",
            )),
        }
    }
}

impl<P: PointerDevice + ?Sized> PointerDevice for Box<P> {
    fn move_absolute(&mut self, to: Point) -> PointerResult<()> {
        (**self).move_absolute(to)
    }

    fn query_position(&mut self) -> PointerResult<Point> {
        (**self).query_position()
    }

    fn press_button(&mut self, button: MouseButton) -> PointerResult<()> {
        (**self).press_button(button)
    }

    fn release_button(&mut self, button: MouseButton) -> PointerResult<()> {
        (**self).release_button(button)
    }

    fn screen_size(&mut self) -> PointerResult<(i32, i32)> {
        (**self).screen_size()
    }
}

/// In-memory pointer
#[derive(Debug, Clone)]
pub struct VirtualPointer {
    position: Point,
    width: i32,
    height: i32,
    held: [bool; 2],
    presses: u64,
    releases: u64,
}

impl VirtualPointer {
    pub fn new(width: i32, height: i32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            position: Point::new(width / 2, height / 2),
            width,
            height,
            held: [false; 2],
            presses: 0,
            releases: 0,
        }
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn is_held(&self, button: MouseButton) -> bool {
        self.held[button.index()]
    }

    /// Get statistics as `(presses, releases)`
    pub fn stats(&self) -> (u64, u64) {
        (self.presses, self.releases)
    }
}

impl Drop for VirtualPointer {
    fn drop(&mut self) {
        let (presses, releases) = self.stats();
        debug!(
            "Virtual pointer finished at {} after {} presses and {} releases",
            self.position, presses, releases
        );
    }
}

impl PointerDevice for VirtualPointer {
    fn move_absolute(&mut self, to: Point) -> PointerResult<()> {
        self.position = Point::new(
            to.x.clamp(0, self.width - 1),
            to.y.clamp(0, self.height - 1),
        );
        debug!("Virtual pointer at {}", self.position);
        Ok(())
    }

    fn query_position(&mut self) -> PointerResult<Point> {
        Ok(self.position)
    }

    fn press_button(&mut self, button: MouseButton) -> PointerResult<()> {
        self.held[button.index()] = true;
        self.presses += 1;
        debug!("Virtual {} button down", button);
        Ok(())
    }

    fn release_button(&mut self, button: MouseButton) -> PointerResult<()> {
        self.held[button.index()] = false;
        self.releases += 1;
        debug!("Virtual {} button up", button);
        Ok(())
    }

    fn screen_size(&mut self) -> PointerResult<(i32, i32)> {
        Ok((self.width, self.height))
    }
}

#[cfg(feature = "native-pointer")]
mod native {
    use super::{MouseButton, Point, PointerDevice, PointerError, PointerResult};
    use enigo::{Button, Coordinate, Direction, Enigo, Mouse, Settings};

    /// Host pointer driven through `enigo`
    pub struct NativePointer {
        enigo: Enigo,
    }

    impl NativePointer {
        pub fn new() -> PointerResult<Self> {
            let enigo = Enigo::new(&Settings::default())
                .map_err(|e| PointerError::unavailable(e.to_string()))?;
            Ok(Self { enigo })
        }

        fn button(button: MouseButton) -> Button {
            match button {
                MouseButton::Left => Button::Left,
                MouseButton::Right => Button::Right,
            }
        }
    }

    impl PointerDevice for NativePointer {
        fn move_absolute(&mut self, to: Point) -> PointerResult<()> {
            self.enigo
                .move_mouse(to.x, to.y, Coordinate::Abs)
                .map_err(|e| PointerError::call(e.to_string()))
        }

        fn query_position(&mut self) -> PointerResult<Point> {
            let (x, y) = self
                .enigo
                .location()
                .map_err(|e| PointerError::call(e.to_string()))?;
            Ok(Point::new(x, y))
        }

        fn press_button(&mut self, button: MouseButton) -> PointerResult<()> {
            self.enigo
                .button(Self::button(button), Direction::Press)
                .map_err(|e| PointerError::call(e.to_string()))
        }

        fn release_button(&mut self, button: MouseButton) -> PointerResult<()> {
            self.enigo
                .button(Self::button(button), Direction::Release)
                .map_err(|e| PointerError::call(e.to_string()))
        }

        fn screen_size(&mut self) -> PointerResult<(i32, i32)> {
            self.enigo
                .main_display()
                .map_err(|e| PointerError::call(e.to_string()))
        }
    }
}
