/*!
Zone controller.

Turns each [`Sample`] into pointer speed and button intents. The heading and
vertical axes are classified independently against their calibration; the
result drives a [`PointerControl`] while it is connected.

| Zone     | Commanded speed                         |
|----------|-----------------------------------------|
| Null     | zero                                    |
| Active   | offset (or distance past null) x factor |
| Inactive | unchanged, or zero with `Stop`          |

The left button follows sensor button B and the right button follows sensor
button A. Losing the sensor always disconnects the pointer.
*/

use crate::actuator::PointerControl;
use crate::events::PointerEvent;
use crate::pointer::MouseButton;
use crate::sensor::{SensorError, SensorListener};
use serde::{Deserialize, Serialize};
use shared::{AngularValue, AxisCalibration, Classification, Sample, SpeedOrigin, Zone};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// What happens to an axis that leaves its limit boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactivePolicy {
    /// Keep the last commanded speed
    #[default]
    Hold,
    /// Command zero speed
    Stop,
}

/// Calibration and speed factor of one axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axis {
    pub calibration: AxisCalibration,
    pub speed: f64,
}

impl Axis {
    pub fn new(calibration: AxisCalibration, speed: f64) -> Self {
        Self { calibration, speed }
    }
}

/// Latest classification, for display
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ControllerStatus {
    pub heading: Zone,
    pub vertical: Zone,
    pub heading_offset: f64,
    pub vertical_offset: f64,
}

pub struct MouseController {
    pointer: Arc<dyn PointerControl>,
    heading: Axis,
    vertical: Axis,
    inactive_policy: InactivePolicy,
    speed_origin: SpeedOrigin,
    centre_on_engage: bool,
    status: Mutex<ControllerStatus>,
    downstream: Option<Arc<dyn SensorListener>>,
}

impl MouseController {
    pub fn new(pointer: Arc<dyn PointerControl>, heading: Axis, vertical: Axis) -> Self {
        Self {
            pointer,
            heading,
            vertical,
            inactive_policy: InactivePolicy::default(),
            speed_origin: SpeedOrigin::default(),
            centre_on_engage: false,
            status: Mutex::new(ControllerStatus::default()),
            downstream: None,
        }
    }

    pub fn with_inactive_policy(mut self, policy: InactivePolicy) -> Self {
        self.inactive_policy = policy;
        self
    }

    pub fn with_speed_origin(mut self, origin: SpeedOrigin) -> Self {
        self.speed_origin = origin;
        self
    }

    pub fn with_centre_on_engage(mut self, centre: bool) -> Self {
        self.centre_on_engage = centre;
        self
    }

    /// Forward every sensor callback to `listener` after handling it
    pub fn with_downstream(mut self, listener: Arc<dyn SensorListener>) -> Self {
        self.downstream = Some(listener);
        self
    }

    pub fn status(&self) -> ControllerStatus {
        *self.lock_status()
    }

    pub fn is_connected(&self) -> bool {
        self.pointer.is_connected()
    }

    fn lock_status(&self) -> MutexGuard<'_, ControllerStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand pointer control to the sensor
    pub fn connect(&self) {
        let mut status = self.lock_status();
        *status = ControllerStatus {
            heading: Zone::NullZone,
            vertical: Zone::NullZone,
            heading_offset: 0.0,
            vertical_offset: 0.0,
        };
        self.pointer.connect();
        if self.centre_on_engage {
            self.pointer.centre();
        }
    }

    /// Hand pointer control back to the real mouse
    pub fn disconnect(&self) {
        let mut status = self.lock_status();
        self.pointer.disconnect();
        status.heading = Zone::Disconnected;
        status.vertical = Zone::Disconnected;
    }

    /// React to actuator notifications delivered through the event channel
    pub fn handle_pointer_event(&self, event: &PointerEvent) {
        match event {
            PointerEvent::NotInPosition {
                expected,
                actual,
                count,
            } => {
                warn!(
                    "🖐️ Pointer moved by hand (expected {}, found {} after {} ticks), releasing control",
                    expected, actual, count
                );
                self.disconnect();
            }
            PointerEvent::Connected | PointerEvent::Disconnected => {}
        }
    }

    fn commanded_speed(&self, classification: &Classification, factor: f64) -> Option<f64> {
        match classification.speed(self.speed_origin, factor) {
            Some(speed) => Some(speed),
            None if self.inactive_policy == InactivePolicy::Stop => Some(0.0),
            None => None,
        }
    }

    fn apply(&self, sample: &Sample) {
        let heading = self
            .heading
            .calibration
            .classify_heading(AngularValue::normalize(sample.heading));
        let vertical = self.vertical.calibration.classify_vertical(sample.y);

        // Held until every intent is written, so a concurrent connect or
        // disconnect sees either none or all of this sample.
        let mut status = self.lock_status();
        let connected = self.pointer.is_connected();
        status.heading_offset = heading.offset;
        status.vertical_offset = vertical.offset;
        if !connected {
            return;
        }
        status.heading = heading.zone;
        status.vertical = vertical.zone;

        if let Some(speed) = self.commanded_speed(&heading, self.heading.speed) {
            self.pointer.set_speed_x(speed);
        }
        if let Some(speed) = self.commanded_speed(&vertical, self.vertical.speed) {
            self.pointer.set_speed_y(speed);
        }

        for (button, pressed) in [
            (MouseButton::Left, sample.button_b_sensor),
            (MouseButton::Right, sample.button_a_sensor),
        ] {
            if pressed {
                self.pointer.press(button);
            } else {
                self.pointer.release(button);
            }
        }
    }
}

impl SensorListener for MouseController {
    fn reading(&self, sample: &Sample) {
        self.apply(sample);
        if let Some(downstream) = &self.downstream {
            downstream.reading(sample);
        }
    }

    fn fail(&self, error: &SensorError) {
        warn!("Sensor failed, releasing pointer: {}", error);
        self.disconnect();
        if let Some(downstream) = &self.downstream {
            downstream.fail(error);
        }
    }

    fn connected(&self, port: &str, baud: u32, name: &str) {
        debug!("Controller sees sensor '{}' on {}", name, port);
        if let Some(downstream) = &self.downstream {
            downstream.connected(port, baud, name);
        }
    }

    fn disconnected(&self, port: &str, name: &str) {
        info!("Sensor '{}' on {} gone, releasing pointer", name, port);
        self.disconnect();
        if let Some(downstream) = &self.downstream {
            downstream.disconnected(port, name);
        }
    }

    fn raw_data(&self, frame: &str) -> bool {
        match &self.downstream {
            Some(downstream) => downstream.raw_data(frame),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ButtonState;
    use crate::pointer::Point;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Records every call, like a wiretap on the actuator
    #[derive(Default)]
    struct MockPointer {
        log: Mutex<Vec<String>>,
        connected: AtomicBool,
        disconnecting: AtomicBool,
        /// How long `disconnect` takes, like waiting for a button release
        disconnect_delay: Duration,
    }

    impl MockPointer {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn count(&self, call: &str) -> usize {
            self.log().iter().filter(|c| c.as_str() == call).count()
        }

        fn any(&self, prefix: &str) -> bool {
            self.log().iter().any(|c| c.starts_with(prefix))
        }

        fn record(&self, call: String) {
            self.log.lock().unwrap().push(call);
        }
    }

    impl PointerControl for MockPointer {
        fn connect(&self) {
            self.connected.store(true, Ordering::SeqCst);
            self.record("connect".to_string());
        }

        fn disconnect(&self) {
            self.disconnecting.store(true, Ordering::SeqCst);
            thread::sleep(self.disconnect_delay);
            self.connected.store(false, Ordering::SeqCst);
            self.record("disconnect".to_string());
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn set_speed_x(&self, speed: f64) {
            self.record(format!("set_speed_x({:?})", speed));
        }

        fn set_speed_y(&self, speed: f64) {
            self.record(format!("set_speed_y({:?})", speed));
        }

        fn press(&self, button: MouseButton) {
            self.record(format!("{}_press", button));
        }

        fn release(&self, button: MouseButton) {
            self.record(format!("{}_release", button));
        }

        fn button_state(&self, _button: MouseButton) -> ButtonState {
            ButtonState::IsUp
        }

        fn move_to(&self, x: f64, y: f64) {
            self.record(format!("move_to({:?},{:?})", x, y));
        }

        fn centre(&self) {
            self.record("centre".to_string());
        }
    }

    #[derive(Default)]
    struct Downstream {
        events: Mutex<Vec<String>>,
    }

    impl SensorListener for Downstream {
        fn reading(&self, sample: &Sample) {
            self.events
                .lock()
                .unwrap()
                .push(format!("reading({})", sample.heading));
        }

        fn fail(&self, _error: &SensorError) {
            self.events.lock().unwrap().push("fail".to_string());
        }

        fn connected(&self, _port: &str, _baud: u32, _name: &str) {
            self.events.lock().unwrap().push("connected".to_string());
        }

        fn disconnected(&self, _port: &str, _name: &str) {
            self.events.lock().unwrap().push("disconnected".to_string());
        }
    }

    fn controller(heading_speed: f64, vertical_speed: f64) -> (MouseController, Arc<MockPointer>) {
        let pointer = Arc::new(MockPointer::default());
        let mc = MouseController::new(
            pointer.clone(),
            Axis::new(AxisCalibration::new(0, 10, 20).unwrap(), heading_speed),
            Axis::new(AxisCalibration::new(0, 20, 30).unwrap(), vertical_speed),
        );
        (mc, pointer)
    }

    fn sample(frame: &str) -> Sample {
        Sample::parse(frame, true, true).unwrap()
    }

    #[test]
    fn test_connected_mouse_in_active_zone() {
        let (mc, robot) = controller(1.0, 1.0);
        mc.connect();
        assert!(mc.is_connected());
        mc.reading(&sample("0,25,15,0,1,1,1:"));
        mc.disconnect();
        assert!(!mc.is_connected());

        assert_eq!(robot.count("set_speed_x(15.0)"), 1);
        assert_eq!(robot.count("set_speed_y(25.0)"), 1);
        assert_eq!(robot.count("left_press"), 1);
        assert_eq!(robot.count("right_release"), 1);
        assert_eq!(robot.count("connect"), 1);
        assert_eq!(robot.count("disconnect"), 1);
        assert_eq!(robot.log().len(), 6);
    }

    #[test]
    fn test_connected_mouse_outside_active_zone() {
        let (mc, robot) = controller(1.0, 1.0);
        mc.connect();
        mc.reading(&sample("0,-35,-25,1,0,1,1:"));
        assert_eq!(mc.status().heading, Zone::Inactive);
        assert_eq!(mc.status().vertical, Zone::Inactive);
        mc.disconnect();

        assert!(!robot.any("set_speed"));
        assert_eq!(robot.count("left_release"), 1);
        assert_eq!(robot.count("right_press"), 1);
        assert_eq!(robot.count("connect"), 1);
        assert_eq!(robot.count("disconnect"), 1);
    }

    #[test]
    fn test_connected_mouse_in_null_zone() {
        let (mc, robot) = controller(1.0, 1.0);
        mc.connect();
        mc.reading(&sample("0,0,0,1,1,1,1:"));
        mc.disconnect();

        assert_eq!(robot.count("set_speed_x(0.0)"), 1);
        assert_eq!(robot.count("set_speed_y(0.0)"), 1);
        assert_eq!(robot.count("left_press"), 1);
        assert_eq!(robot.count("right_press"), 1);
    }

    #[test]
    fn test_connected_mouse_in_active_zone_with_speed() {
        let (mc, robot) = controller(0.5, 2.0);
        mc.connect();
        mc.reading(&sample("0,25,15,0,0,1,1:"));
        mc.disconnect();

        assert_eq!(robot.count("set_speed_x(7.5)"), 1);
        assert_eq!(robot.count("set_speed_y(50.0)"), 1);
        assert_eq!(robot.count("left_release"), 1);
        assert_eq!(robot.count("right_release"), 1);
    }

    #[test]
    fn test_disconnected_mouse_is_left_alone() {
        let (mc, robot) = controller(1.0, 1.0);
        mc.reading(&sample("0,0,0,1,1,1,1:"));
        assert!(robot.log().is_empty());
        assert_eq!(mc.status().heading, Zone::Disconnected);
    }

    #[test]
    fn test_stop_policy_zeroes_inactive_axes() {
        let (mc, robot) = controller(1.0, 1.0);
        let mc = mc.with_inactive_policy(InactivePolicy::Stop);
        mc.connect();
        mc.reading(&sample("0,-35,-25,1,0,1,1:"));

        assert_eq!(robot.count("set_speed_x(0.0)"), 1);
        assert_eq!(robot.count("set_speed_y(0.0)"), 1);
    }

    #[test]
    fn test_speed_from_null_boundary() {
        let (mc, robot) = controller(1.0, 1.0);
        let mc = mc.with_speed_origin(SpeedOrigin::NullBoundary);
        mc.connect();
        mc.reading(&sample("0,25,15,0,0,0,0:"));

        assert_eq!(robot.count("set_speed_x(5.0)"), 1);
        assert_eq!(robot.count("set_speed_y(5.0)"), 1);
    }

    #[test]
    fn test_heading_sign_follows_rotation() {
        let (mc, robot) = controller(1.0, 1.0);
        mc.connect();
        mc.reading(&sample("0,0,345,0,0,0,0:"));
        assert_eq!(robot.count("set_speed_x(-15.0)"), 1);
        assert_eq!(mc.status().heading_offset, -15.0);
    }

    #[test]
    fn test_status_tracks_zones() {
        let (mc, _) = controller(1.0, 1.0);
        mc.reading(&sample("0,25,15,0,0,0,0:"));
        let status = mc.status();
        assert_eq!(status.heading, Zone::Disconnected);
        assert_eq!(status.heading_offset, 15.0);

        mc.connect();
        assert_eq!(mc.status().heading, Zone::NullZone);
        assert_eq!(mc.status().heading_offset, 0.0);

        mc.reading(&sample("0,25,15,0,0,0,0:"));
        assert_eq!(mc.status().heading, Zone::Active);
        assert_eq!(mc.status().vertical, Zone::Active);

        mc.disconnect();
        assert_eq!(mc.status().heading, Zone::Disconnected);
        assert_eq!(mc.status().vertical, Zone::Disconnected);
    }

    #[test]
    fn test_sensor_loss_disconnects_and_forwards() {
        let (mc, robot) = controller(1.0, 1.0);
        let downstream = Arc::new(Downstream::default());
        let mc = mc.with_downstream(downstream.clone());

        mc.connected("/dev/ttyUSB0", 9600, "head");
        mc.connect();
        mc.reading(&sample("0,0,0,0,0,0,0:"));
        mc.fail(&SensorError::EndOfStream {
            port: "/dev/ttyUSB0".to_string(),
        });
        assert!(!mc.is_connected());
        mc.disconnected("/dev/ttyUSB0", "head");

        assert_eq!(robot.count("disconnect"), 2);
        assert_eq!(
            *downstream.events.lock().unwrap(),
            vec!["connected", "reading(0)", "fail", "disconnected"]
        );
        assert!(!mc.raw_data("0,0,0,0,0,0,0"));
    }

    #[test]
    fn test_hand_on_mouse_disconnects() {
        let (mc, robot) = controller(1.0, 1.0);
        mc.connect();
        mc.handle_pointer_event(&PointerEvent::Connected);
        assert!(mc.is_connected());

        mc.handle_pointer_event(&PointerEvent::NotInPosition {
            expected: Point::new(10, 10),
            actual: Point::new(200, 90),
            count: 4,
        });
        assert!(!mc.is_connected());
        assert_eq!(robot.count("disconnect"), 1);
    }

    #[test]
    fn test_centre_on_engage() {
        let (mc, robot) = controller(1.0, 1.0);
        let mc = mc.with_centre_on_engage(true);
        mc.connect();
        assert_eq!(robot.log(), vec!["connect", "centre"]);
    }

    #[test]
    fn test_reading_waits_for_concurrent_disconnect() {
        let pointer = Arc::new(MockPointer {
            disconnect_delay: Duration::from_millis(100),
            ..Default::default()
        });
        let mc = Arc::new(MouseController::new(
            pointer.clone(),
            Axis::new(AxisCalibration::new(0, 10, 20).unwrap(), 1.0),
            Axis::new(AxisCalibration::new(0, 20, 30).unwrap(), 1.0),
        ));
        mc.connect();

        let disconnecting = Arc::clone(&mc);
        let handle = thread::spawn(move || disconnecting.disconnect());
        while !pointer.disconnecting.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        mc.reading(&sample("0,25,15,0,1,1,1:"));
        handle.join().unwrap();

        assert!(!pointer.any("set_speed"));
        assert!(!pointer.any("left_press"));
        assert_eq!(pointer.log(), vec!["connect", "disconnect"]);
        assert_eq!(mc.status().heading, Zone::Disconnected);
        assert_eq!(mc.status().vertical, Zone::Disconnected);
    }
}
