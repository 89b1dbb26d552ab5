/*!
Sensor reader thread and serial transport.

The reader owns the transport. It splits the byte stream into frames,
decodes each one into a [`Sample`] and hands it to a [`SensorListener`] on
its own thread. A malformed frame is dropped and logged; a transport error
or end of stream ends the loop.

Lifecycle: `Idle -> Connected -> Closing -> Closed`. `disconnected` is
delivered exactly once, when the loop exits.
*/

use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, StopBits};
use shared::{FrameSplitter, Sample};
use std::io::{self, ErrorKind, Read};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

/// Read timeout on the serial port; bounds how long `close` takes to be seen
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 64;

/// Sensor transport errors
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Failed to list serial ports: {0}")]
    Enumerate(#[source] serialport::Error),

    #[error("Read from {port} failed: {source}")]
    Read {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("Sensor on {port} ended the stream")]
    EndOfStream { port: String },

    #[error("Reader thread failed to start: {0}")]
    Spawn(#[source] io::Error),
}

/// Receives everything the reader produces. Called on the reader thread.
pub trait SensorListener: Send + Sync {
    fn reading(&self, sample: &Sample);

    /// The stream ended without `close` being requested
    fn fail(&self, error: &SensorError);

    fn connected(&self, port: &str, baud: u32, name: &str);

    fn disconnected(&self, port: &str, name: &str);

    /// Sees every frame before decoding. Return `true` to consume it.
    fn raw_data(&self, _frame: &str) -> bool {
        false
    }
}

/// Reader state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReaderState {
    Idle = 0,
    Connected = 1,
    Closing = 2,
    Closed = 3,
}

impl ReaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReaderState::Idle,
            1 => ReaderState::Connected,
            2 => ReaderState::Closing,
            _ => ReaderState::Closed,
        }
    }
}

/// What the reader needs to know about the sensor it reads
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    pub port: String,
    pub baud: u32,
    pub name: String,
    pub swap_lr: bool,
    pub swap_ud: bool,
    pub max_frame_len: usize,
    /// Log every frame at debug level
    pub log_raw_frames: bool,
}

/// Handle to a running reader thread
pub struct SensorReader {
    state: Arc<AtomicU8>,
    port: String,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SensorReader {
    /// Start reading `transport` on a new thread
    pub fn spawn<T>(
        transport: T,
        info: SensorInfo,
        listener: Arc<dyn SensorListener>,
    ) -> Result<Self, SensorError>
    where
        T: Read + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(ReaderState::Idle as u8));
        let port = info.port.clone();
        let thread_state = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name(format!("sensor-{}", info.port))
            .spawn(move || read_loop(transport, &info, &thread_state, listener.as_ref()))
            .map_err(SensorError::Spawn)?;

        Ok(Self {
            state,
            port,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn state(&self) -> ReaderState {
        ReaderState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), ReaderState::Idle | ReaderState::Connected)
    }

    /// Ask the loop to stop. Does not wait; safe from any thread, including
    /// listener callbacks.
    pub fn close(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                match ReaderState::from_u8(s) {
                    ReaderState::Idle | ReaderState::Connected => {
                        Some(ReaderState::Closing as u8)
                    }
                    ReaderState::Closing | ReaderState::Closed => None,
                }
            });
    }

    /// Wait for the reader thread to finish
    pub fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Sensor reader thread for {} panicked", self.port);
            }
        }
    }
}

impl Drop for SensorReader {
    fn drop(&mut self) {
        self.close();
        self.join();
    }
}

fn read_loop<T: Read>(
    mut transport: T,
    info: &SensorInfo,
    state: &AtomicU8,
    listener: &dyn SensorListener,
) {
    // A close that lands before the thread starts still gets a
    // connected/disconnected pair; the loop below exits straight away.
    let _ = state.compare_exchange(
        ReaderState::Idle as u8,
        ReaderState::Connected as u8,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
    info!("📡 Sensor '{}' connected on {} at {} baud", info.name, info.port, info.baud);
    listener.connected(&info.port, info.baud, &info.name);

    let mut splitter = FrameSplitter::new(info.max_frame_len);
    let mut buffer = [0u8; READ_CHUNK];
    let mut bytes = 0u64;
    let mut decoded = 0u64;
    let mut malformed = 0u64;
    let mut intercepted = 0u64;

    let failure = loop {
        if ReaderState::from_u8(state.load(Ordering::SeqCst)) != ReaderState::Connected {
            break None;
        }
        match transport.read(&mut buffer) {
            Ok(0) => {
                break Some(SensorError::EndOfStream {
                    port: info.port.clone(),
                })
            }
            Ok(n) => {
                bytes += n as u64;
                for &byte in &buffer[..n] {
                    let Some(frame) = splitter.push(byte) else {
                        continue;
                    };
                    if info.log_raw_frames {
                        debug!("Frame: {}", frame);
                    }
                    if listener.raw_data(&frame) {
                        intercepted += 1;
                        continue;
                    }
                    match Sample::parse(&frame, info.swap_lr, info.swap_ud) {
                        Ok(sample) => {
                            decoded += 1;
                            listener.reading(&sample);
                        }
                        Err(e) => {
                            malformed += 1;
                            debug!("Dropping frame {:?}: {}", frame, e);
                        }
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => {
                break Some(SensorError::Read {
                    port: info.port.clone(),
                    source: e,
                })
            }
        }
    };

    drop(transport);
    splitter.reset();
    let previous = ReaderState::from_u8(state.swap(ReaderState::Closed as u8, Ordering::SeqCst));

    let (frames, overflows) = splitter.stats();
    info!("📈 Sensor reader final stats:");
    info!("   Bytes: {}", bytes);
    info!("   Frames: {}", frames);
    info!("   Decoded: {}", decoded);
    info!("   Malformed: {}", malformed);
    info!("   Intercepted: {}", intercepted);
    info!("   Overflows: {}", overflows);

    if let Some(e) = failure {
        if previous == ReaderState::Closing {
            debug!("Ignoring error after close: {}", e);
        } else {
            error!("Sensor stream failed: {}", e);
            listener.fail(&e);
        }
    }
    info!("Sensor '{}' disconnected from {}", info.name, info.port);
    listener.disconnected(&info.port, &info.name);
}

/// Open `port` as 8N1 without flow control
pub fn open_serial(port: &str, baud: u32) -> Result<Box<dyn SerialPort>, SensorError> {
    serialport::new(port, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|source| SensorError::Open {
            port: port.to_string(),
            source,
        })
}

/// Serial ports present on this machine
pub fn available_ports() -> Result<Vec<SerialPortInfo>, SensorError> {
    serialport::available_ports().map_err(SensorError::Enumerate)
}
