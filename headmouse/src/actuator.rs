/*!
Pointer and button executor.

The actuator owns a single thread that makes every call into the host pointer
API. Other threads only talk to it through:

- two commanded speeds (pixels per second, stored as atomic `f64` bits)
- one four-state cell per button
- `connect` / `disconnect` / `close`

## Button protocol

Any thread may request `RequestDown` or `RequestUp`. Requests are idempotent.
Only the tick loop moves a cell from `Request*` to `Is*`, and it issues at
most one native action per button per tick.

## Tick loop

Every tick the loop:

1. checks whether the host pointer has drifted from where it was last put
   (someone moved the real mouse) and reports it after enough consecutive
   ticks,
2. integrates the commanded speed into the fractional position, clamps it to
   the screen and moves the pointer,
3. settles pending button requests.

While disengaged the loop follows the host pointer instead of driving it.
*/

use crate::pointer::{MouseButton, Point, PointerDevice, PointerError, PointerResult, Rect};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Receives actuator notifications. Called from the actuator thread or from
/// whichever thread calls `connect` / `disconnect`.
pub trait PointerListener: Send + Sync {
    /// The host pointer kept disagreeing with the commanded position
    fn mouse_not_in_position(&self, expected: Point, actual: Point, count: u32);

    /// Pointer control passed to the sensor
    fn connected_mouse(&self);

    /// Pointer control passed back to the real mouse
    fn disconnected_mouse(&self);
}

/// Control surface the zone controller drives
pub trait PointerControl: Send + Sync {
    fn connect(&self);

    /// Stop, release both buttons and hand control back. Blocks for a bounded time.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn set_speed_x(&self, speed: f64);

    fn set_speed_y(&self, speed: f64);

    fn press(&self, button: MouseButton);

    fn release(&self, button: MouseButton);

    fn button_state(&self, button: MouseButton) -> ButtonState;

    /// Jump to an absolute position on the next tick
    fn move_to(&self, x: f64, y: f64);

    /// Jump to the middle of the screen on the next tick
    fn centre(&self);
}

/// Per-button state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ButtonState {
    IsUp = 0,
    RequestDown = 1,
    IsDown = 2,
    RequestUp = 3,
}

impl ButtonState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ButtonState::RequestDown,
            2 => ButtonState::IsDown,
            3 => ButtonState::RequestUp,
            _ => ButtonState::IsUp,
        }
    }
}

struct ButtonCell(AtomicU8);

impl ButtonCell {
    fn new() -> Self {
        Self(AtomicU8::new(ButtonState::IsUp as u8))
    }

    fn load(&self) -> ButtonState {
        ButtonState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn request_down(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                match ButtonState::from_u8(s) {
                    ButtonState::IsUp | ButtonState::RequestUp => {
                        Some(ButtonState::RequestDown as u8)
                    }
                    ButtonState::IsDown | ButtonState::RequestDown => None,
                }
            });
    }

    fn request_up(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                match ButtonState::from_u8(s) {
                    ButtonState::IsDown | ButtonState::RequestDown => {
                        Some(ButtonState::RequestUp as u8)
                    }
                    ButtonState::IsUp | ButtonState::RequestUp => None,
                }
            });
    }

    /// Complete a request. Fails if another request replaced it meanwhile.
    fn settle(&self, from: ButtonState, to: ButtonState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn force_up(&self) {
        self.0.store(ButtonState::IsUp as u8, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Target {
    Absolute(f64, f64),
    Centre,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Link {
    Disconnected = 0,
    Connected = 1,
    Disconnecting = 2,
}

impl Link {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Link::Connected,
            2 => Link::Disconnecting,
            _ => Link::Disconnected,
        }
    }
}

/// Actuator tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorSettings {
    /// Tick period
    pub tick: Duration,
    /// Pixels the host pointer may differ from the commanded position
    pub out_of_position_tolerance: i32,
    /// Consecutive drifted ticks tolerated before reporting
    pub out_of_position_threshold: u32,
    /// Longest `disconnect` waits for the buttons to come up
    pub release_timeout: Duration,
    /// Screen area, queried from the backend when `None`
    pub screen: Option<Rect>,
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(30),
            out_of_position_tolerance: 2,
            out_of_position_threshold: 3,
            release_timeout: Duration::from_millis(500),
            screen: None,
        }
    }
}

struct Shared {
    speed_x: AtomicU64,
    speed_y: AtomicU64,
    buttons: [ButtonCell; 2],
    link: AtomicU8,
    running: AtomicBool,
    ticking: AtomicBool,
    resync: AtomicBool,
    target: Mutex<Option<Target>>,
    settle_lock: Mutex<()>,
    settled: Condvar,
    listener: Arc<dyn PointerListener>,
}

impl Shared {
    fn link(&self) -> Link {
        Link::from_u8(self.link.load(Ordering::SeqCst))
    }

    fn speed(&self) -> (f64, f64) {
        (
            f64::from_bits(self.speed_x.load(Ordering::SeqCst)),
            f64::from_bits(self.speed_y.load(Ordering::SeqCst)),
        )
    }

    fn set_speed(&self, x: f64, y: f64) {
        self.speed_x.store(x.to_bits(), Ordering::SeqCst);
        self.speed_y.store(y.to_bits(), Ordering::SeqCst);
    }

    fn buttons_up(&self) -> bool {
        self.buttons.iter().all(|b| b.load() == ButtonState::IsUp)
    }

    fn notify_settled(&self) {
        let _guard = lock(&self.settle_lock);
        self.settled.notify_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the pointer executor
pub struct Actuator {
    shared: Arc<Shared>,
    settings: ActuatorSettings,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Actuator {
    /// Create the shared state without starting a thread.
    /// Drive it with [`Actuator::tick_loop`].
    pub fn new(settings: ActuatorSettings, listener: Arc<dyn PointerListener>) -> Self {
        Self {
            shared: Arc::new(Shared {
                speed_x: AtomicU64::new(0f64.to_bits()),
                speed_y: AtomicU64::new(0f64.to_bits()),
                buttons: [ButtonCell::new(), ButtonCell::new()],
                link: AtomicU8::new(Link::Disconnected as u8),
                running: AtomicBool::new(true),
                ticking: AtomicBool::new(false),
                resync: AtomicBool::new(true),
                target: Mutex::new(None),
                settle_lock: Mutex::new(()),
                settled: Condvar::new(),
                listener,
            }),
            settings,
            handle: Mutex::new(None),
        }
    }

    /// Start the actuator thread. `factory` builds the pointer backend on that
    /// thread; its failure is returned here.
    pub fn spawn<P, F>(
        settings: ActuatorSettings,
        listener: Arc<dyn PointerListener>,
        factory: F,
    ) -> PointerResult<Self>
    where
        P: PointerDevice + 'static,
        F: FnOnce() -> PointerResult<P> + Send + 'static,
    {
        let actuator = Self::new(settings, listener);
        let shared = Arc::clone(&actuator.shared);
        let (ready_tx, ready_rx) = bounded::<PointerResult<()>>(1);

        let handle = thread::Builder::new()
            .name("actuator".to_string())
            .spawn(move || {
                let tick_loop = match factory().and_then(|p| TickLoop::new(shared, &settings, p)) {
                    Ok(tick_loop) => tick_loop,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                tick_loop.shared.ticking.store(true, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(()));
                tick_loop.run();
            })
            .map_err(|e| PointerError::Spawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *lock(&actuator.handle) = Some(handle);
                Ok(actuator)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(PointerError::Spawn(
                    "actuator thread exited during startup".to_string(),
                ))
            }
        }
    }

    /// Build a tick loop over `device` for manual stepping
    pub fn tick_loop<P: PointerDevice>(&self, device: P) -> PointerResult<TickLoop<P>> {
        TickLoop::new(Arc::clone(&self.shared), &self.settings, device)
    }

    /// Commanded speed as `(x, y)`
    pub fn speed(&self) -> (f64, f64) {
        self.shared.speed()
    }

    /// Stop the tick loop and wait for its cleanup. Safe to call repeatedly.
    pub fn close(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Actuator thread panicked");
            }
            info!("Actuator closed");
        }
    }
}

impl PointerControl for Actuator {
    fn connect(&self) {
        match self.shared.link.compare_exchange(
            Link::Disconnected as u8,
            Link::Connected as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                self.shared.resync.store(true, Ordering::SeqCst);
                info!("🖱️ Pointer control engaged");
                self.shared.listener.connected_mouse();
            }
            Err(current) => {
                debug!("Connect ignored, link is {:?}", Link::from_u8(current));
            }
        }
    }

    fn disconnect(&self) {
        let previous = Link::from_u8(
            self.shared
                .link
                .swap(Link::Disconnecting as u8, Ordering::SeqCst),
        );
        self.shared.set_speed(0.0, 0.0);
        if previous == Link::Disconnected {
            self.shared
                .link
                .store(Link::Disconnected as u8, Ordering::SeqCst);
            return;
        }

        self.shared.resync.store(true, Ordering::SeqCst);
        for cell in &self.shared.buttons {
            cell.request_up();
        }
        if previous == Link::Connected {
            info!("🖱️ Pointer control released");
            self.shared.listener.disconnected_mouse();
        }

        if self.shared.ticking.load(Ordering::SeqCst) {
            let guard = lock(&self.shared.settle_lock);
            let _ = self
                .shared
                .settled
                .wait_timeout_while(guard, self.settings.release_timeout, |_| {
                    !self.shared.buttons_up() && self.shared.ticking.load(Ordering::SeqCst)
                })
                .unwrap_or_else(PoisonError::into_inner);
        }
        if !self.shared.buttons_up() {
            if self.shared.ticking.load(Ordering::SeqCst) {
                warn!(
                    "Buttons not released within {:?}, forcing them up",
                    self.settings.release_timeout
                );
            }
            for cell in &self.shared.buttons {
                cell.force_up();
            }
        }

        self.shared
            .link
            .store(Link::Disconnected as u8, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.shared.link() == Link::Connected
    }

    fn set_speed_x(&self, speed: f64) {
        self.shared.speed_x.store(speed.to_bits(), Ordering::SeqCst);
    }

    fn set_speed_y(&self, speed: f64) {
        self.shared.speed_y.store(speed.to_bits(), Ordering::SeqCst);
    }

    fn press(&self, button: MouseButton) {
        self.shared.buttons[button.index()].request_down();
    }

    fn release(&self, button: MouseButton) {
        self.shared.buttons[button.index()].request_up();
    }

    fn button_state(&self, button: MouseButton) -> ButtonState {
        self.shared.buttons[button.index()].load()
    }

    fn move_to(&self, x: f64, y: f64) {
        *lock(&self.shared.target) = Some(Target::Absolute(x, y));
    }

    fn centre(&self) {
        *lock(&self.shared.target) = Some(Target::Centre);
    }
}

impl Drop for Actuator {
    fn drop(&mut self) {
        self.close();
    }
}

/// The actuator thread body. Dropping it releases any button it still holds.
pub struct TickLoop<P: PointerDevice> {
    shared: Arc<Shared>,
    pointer: P,
    bounds: Rect,
    tick: Duration,
    tolerance: i32,
    threshold: u32,
    position: (f64, f64),
    commanded: Point,
    last_tick: Instant,
    held: [bool; 2],
    out_of_position: u32,
    ticks: u64,
    moves: u64,
    presses: u64,
    releases: u64,
    errors: u64,
}

impl<P: PointerDevice> TickLoop<P> {
    fn new(shared: Arc<Shared>, settings: &ActuatorSettings, mut pointer: P) -> PointerResult<Self> {
        let bounds = match settings.screen {
            Some(rect) => rect,
            None => {
                let (width, height) = pointer.screen_size()?;
                Rect::new(0, 0, width, height)
            }
        };
        let at = pointer.query_position()?;
        debug!("Pointer bounds {:?}, starting at {}", bounds, at);

        Ok(Self {
            shared,
            pointer,
            bounds,
            tick: settings.tick,
            tolerance: settings.out_of_position_tolerance,
            threshold: settings.out_of_position_threshold,
            position: (at.x as f64, at.y as f64),
            commanded: at,
            last_tick: Instant::now(),
            held: [false; 2],
            out_of_position: 0,
            ticks: 0,
            moves: 0,
            presses: 0,
            releases: 0,
            errors: 0,
        })
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Fractional position the loop is driving
    pub fn position(&self) -> (f64, f64) {
        self.position
    }

    /// Run until the actuator is closed
    pub fn run(mut self) {
        self.shared.ticking.store(true, Ordering::SeqCst);
        info!("🚀 Actuator started (tick {:?}, bounds {:?})", self.tick, self.bounds);

        while self.shared.running.load(Ordering::SeqCst) {
            if let Err(e) = self.step(Instant::now()) {
                error!("Pointer call failed: {}", e);
                self.errors += 1;
            }
            thread::sleep(self.tick);
        }

        info!("📈 Actuator final stats:");
        info!("   Ticks: {}", self.ticks);
        info!("   Moves: {}", self.moves);
        info!("   Presses: {}", self.presses);
        info!("   Releases: {}", self.releases);
        info!("   Errors: {}", self.errors);
    }

    /// One tick at time `now`
    pub fn step(&mut self, now: Instant) -> PointerResult<()> {
        let elapsed = now.saturating_duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;
        self.ticks += 1;

        let connected = self.shared.link() == Link::Connected;
        if self.shared.resync.swap(false, Ordering::SeqCst) || !connected {
            self.follow_host()?;
        } else {
            self.check_position()?;
        }

        if connected {
            let target = lock(&self.shared.target).take();
            if let Some(target) = target {
                self.position = match target {
                    Target::Absolute(x, y) => self.bounds.clamp(x, y),
                    Target::Centre => {
                        let centre = self.bounds.centre();
                        (centre.x as f64, centre.y as f64)
                    }
                };
                self.move_pointer()?;
            }

            let (vx, vy) = self.shared.speed();
            if vx != 0.0 || vy != 0.0 {
                let (x, y) = self.position;
                self.position = self.bounds.clamp(x + vx * elapsed, y + vy * elapsed);
                self.move_pointer()?;
            }
        }

        let result = self.settle_buttons(connected);
        self.shared.notify_settled();
        result
    }

    fn follow_host(&mut self) -> PointerResult<()> {
        let at = self.pointer.query_position()?;
        self.position = (at.x as f64, at.y as f64);
        self.commanded = at;
        self.out_of_position = 0;
        Ok(())
    }

    fn check_position(&mut self) -> PointerResult<()> {
        let actual = self.pointer.query_position()?;
        let expected = self.commanded;
        if (actual.x - expected.x).abs() > self.tolerance
            || (actual.y - expected.y).abs() > self.tolerance
        {
            self.out_of_position += 1;
            if self.out_of_position > self.threshold {
                let count = self.out_of_position;
                self.out_of_position = 0;
                warn!(
                    "Pointer at {} but expected {} for {} ticks",
                    actual, expected, count
                );
                self.shared
                    .listener
                    .mouse_not_in_position(expected, actual, count);
            }
        } else {
            self.out_of_position = 0;
        }
        Ok(())
    }

    fn move_pointer(&mut self) -> PointerResult<()> {
        let to = Point::new(self.position.0 as i32, self.position.1 as i32);
        if to != self.commanded {
            self.pointer.move_absolute(to)?;
            self.commanded = to;
            self.moves += 1;
        }
        Ok(())
    }

    fn settle_buttons(&mut self, connected: bool) -> PointerResult<()> {
        for button in MouseButton::ALL {
            let i = button.index();
            let cell = &self.shared.buttons[i];
            match cell.load() {
                ButtonState::RequestDown if connected => {
                    if !self.held[i] {
                        self.pointer.press_button(button)?;
                        self.held[i] = true;
                        self.presses += 1;
                    }
                    cell.settle(ButtonState::RequestDown, ButtonState::IsDown);
                }
                ButtonState::RequestUp => {
                    if self.held[i] {
                        self.pointer.release_button(button)?;
                        self.held[i] = false;
                        self.releases += 1;
                    }
                    cell.settle(ButtonState::RequestUp, ButtonState::IsUp);
                }
                ButtonState::IsUp if self.held[i] => {
                    self.pointer.release_button(button)?;
                    self.held[i] = false;
                    self.releases += 1;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl<P: PointerDevice> Drop for TickLoop<P> {
    fn drop(&mut self) {
        for button in MouseButton::ALL {
            let i = button.index();
            if self.held[i] {
                if let Err(e) = self.pointer.release_button(button) {
                    error!("Failed to release {} button: {}", button, e);
                }
                self.held[i] = false;
            }
            self.shared.buttons[i].force_up();
        }
        self.shared.ticking.store(false, Ordering::SeqCst);
        self.shared.notify_settled();
    }
}
