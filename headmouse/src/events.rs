/*!
Channel bridge from the reader and actuator threads to the CLI loop.

[`ChannelListener`] implements both listener traits and forwards every
callback as an [`AppEvent`]. Samples use `try_send` so a slow consumer can
never stall the reader; lifecycle events wait up to a second for room.
*/

use crate::actuator::PointerListener;
use crate::pointer::Point;
use crate::sensor::{SensorError, SensorListener};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use shared::Sample;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest a lifecycle event waits for room in a full channel
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Notifications from the actuator
#[derive(Debug, Clone, PartialEq)]
pub enum PointerEvent {
    NotInPosition {
        expected: Point,
        actual: Point,
        count: u32,
    },
    Connected,
    Disconnected,
}

/// Notifications from the sensor reader
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    Reading(Sample),
    /// Frame text intercepted before decoding
    Raw(String),
    Connected { port: String, baud: u32, name: String },
    Disconnected { port: String, name: String },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Sensor(SensorEvent),
    Pointer(PointerEvent),
}

/// Forwards listener callbacks into a bounded channel
pub struct ChannelListener {
    tx: Sender<AppEvent>,
    intercept_raw: bool,
    dropped: AtomicU64,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel
    pub fn new(capacity: usize) -> (Self, Receiver<AppEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                intercept_raw: false,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Consume every frame as [`SensorEvent::Raw`] instead of decoding it
    pub fn intercepting_raw(mut self) -> Self {
        self.intercept_raw = true;
        self
    }

    /// Events dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn offer(&self, event: AppEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Event channel full, dropping sample");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn deliver(&self, event: AppEvent) {
        match self.tx.send_timeout(event, DELIVERY_TIMEOUT) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Event channel stalled, dropping {:?}", event);
            }
            Err(SendTimeoutError::Disconnected(_)) => debug!("Event receiver gone"),
        }
    }
}

impl SensorListener for ChannelListener {
    fn reading(&self, sample: &Sample) {
        self.offer(AppEvent::Sensor(SensorEvent::Reading(sample.clone())));
    }

    fn fail(&self, error: &SensorError) {
        self.deliver(AppEvent::Sensor(SensorEvent::Failed(error.to_string())));
    }

    fn connected(&self, port: &str, baud: u32, name: &str) {
        self.deliver(AppEvent::Sensor(SensorEvent::Connected {
            port: port.to_string(),
            baud,
            name: name.to_string(),
        }));
    }

    fn disconnected(&self, port: &str, name: &str) {
        self.deliver(AppEvent::Sensor(SensorEvent::Disconnected {
            port: port.to_string(),
            name: name.to_string(),
        }));
    }

    fn raw_data(&self, frame: &str) -> bool {
        if self.intercept_raw {
            self.offer(AppEvent::Sensor(SensorEvent::Raw(frame.to_string())));
        }
        self.intercept_raw
    }
}

impl PointerListener for ChannelListener {
    fn mouse_not_in_position(&self, expected: Point, actual: Point, count: u32) {
        self.deliver(AppEvent::Pointer(PointerEvent::NotInPosition {
            expected,
            actual,
            count,
        }));
    }

    fn connected_mouse(&self) {
        self.deliver(AppEvent::Pointer(PointerEvent::Connected));
    }

    fn disconnected_mouse(&self) {
        self.deliver(AppEvent::Pointer(PointerEvent::Disconnected));
    }
}

/// Detects the press of a receiver button from successive samples
#[derive(Debug, Default, Clone, Copy)]
pub struct RisingEdge {
    last: bool,
}

impl RisingEdge {
    /// True only when `pressed` goes from false to true
    pub fn update(&mut self, pressed: bool) -> bool {
        let rising = pressed && !self.last;
        self.last = pressed;
        rising
    }
}
