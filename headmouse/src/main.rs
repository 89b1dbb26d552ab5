/*!
# Head Mouse

Drives the host pointer from a head-worn tilt and compass sensor on a serial
port. Turning the head moves the pointer, the sensor's buttons click.

## Usage

### Control the pointer (default)
```bash
headmouse --config headmouse.toml
headmouse run --port /dev/ttyUSB0
```

### Try a configuration without touching the real pointer
```bash
headmouse run --dry-run --verbose
```

### Watch the sensor
```bash
headmouse monitor            # decoded samples as JSON lines
headmouse monitor --raw      # frames as received
```

### Other tools
```bash
headmouse ports
headmouse config --output headmouse.toml
```

Receiver button A engages pointer control and receiver button B releases it.
Moving the real mouse by hand also releases it.
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serialport::SerialPortType;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod actuator;
mod config;
mod controller;
mod events;
mod pointer;
mod sensor;

use actuator::Actuator;
use config::AppConfig;
use controller::MouseController;
use events::{AppEvent, ChannelListener, RisingEdge, SensorEvent};
use pointer::PointerBackend;
use sensor::{available_ports, open_serial, SensorReader};

const EVENT_CAPACITY: usize = 256;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const VIRTUAL_SCREEN: (i32, i32) = (1920, 1080);

/// Field holding receiver button A in a raw frame
const RECEIVER_A_FIELD: usize = 5;

#[derive(Parser)]
#[command(name = "headmouse")]
#[command(about = "Control the pointer with a serial head-tilt sensor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "headmouse.toml", global = true)]
    config: PathBuf,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the pointer from the sensor
    Run {
        /// Serial port, overrides the configuration
        #[arg(short, long)]
        port: Option<String>,

        /// Use an in-memory pointer instead of the host pointer
        #[arg(long)]
        dry_run: bool,
    },

    /// Print sensor output until receiver button A is pressed
    Monitor {
        /// Serial port, overrides the configuration
        #[arg(short, long)]
        port: Option<String>,

        /// Print frames as received instead of decoded samples
        #[arg(long)]
        raw: bool,
    },

    /// List serial ports
    Ports,

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "headmouse.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `monitor` output stays machine readable
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        None => run_headmouse(load_config(&cli.config)?, false),
        Some(Commands::Run { port, dry_run }) => {
            let mut config = load_config(&cli.config)?;
            if let Some(port) = port {
                config.sensor.port = port;
            }
            run_headmouse(config, dry_run)
        }
        Some(Commands::Monitor { port, raw }) => {
            let mut config = load_config(&cli.config)?;
            if let Some(port) = port {
                config.sensor.port = port;
            }
            run_monitor(config, raw)
        }
        Some(Commands::Ports) => list_ports(),
        Some(Commands::Config { output }) => generate_config_file(output),
    }
}

/// Load the configuration, falling back to defaults when the file is absent
fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load_from_file(path)
    } else {
        warn!("⚠️ No config at {}, using defaults", path.display());
        Ok(AppConfig::new())
    }
}

fn install_ctrlc() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        flag.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(running)
}

/// Run pointer control until Ctrl+C or the sensor goes away
fn run_headmouse(config: AppConfig, dry_run: bool) -> Result<()> {
    let running = install_ctrlc()?;
    let heading = config.heading.axis().context("[heading] calibration")?;
    let vertical = config.vertical.axis().context("[vertical] calibration")?;

    let backend = if dry_run || !cfg!(feature = "native-pointer") {
        if !dry_run {
            warn!("Built without the native-pointer feature, using the in-memory pointer");
        }
        let (width, height) = config
            .pointer
            .screen
            .map(|r| (r.x + r.width, r.y + r.height))
            .unwrap_or(VIRTUAL_SCREEN);
        PointerBackend::Virtual { width, height }
    } else {
        PointerBackend::Native
    };

    let (listener, rx) = ChannelListener::new(EVENT_CAPACITY);
    let listener = Arc::new(listener);

    let actuator = Arc::new(
        Actuator::spawn(config.actuator_settings(), listener.clone(), move || {
            backend.create()
        })
        .context("Failed to start the pointer actuator")?,
    );

    let controller = Arc::new(
        MouseController::new(actuator.clone(), heading, vertical)
            .with_inactive_policy(config.control.inactive_policy)
            .with_speed_origin(config.control.speed_origin)
            .with_centre_on_engage(config.control.centre_on_engage)
            .with_downstream(listener.clone()),
    );

    let info = config.sensor_info();
    info!("🚀 Starting head mouse on {} at {} baud", info.port, info.baud);
    let transport = open_serial(&info.port, info.baud)?;
    let reader = SensorReader::spawn(transport, info, controller.clone())?;

    control_loop(&running, &rx, &controller, config.control.auto_engage);

    reader.close();
    reader.join();
    controller.disconnect();
    actuator.close();
    if listener.dropped() > 0 {
        warn!("{} events were dropped by the event channel", listener.dropped());
    }

    println!("✅ Head mouse stopped");
    Ok(())
}

fn control_loop(
    running: &AtomicBool,
    rx: &Receiver<AppEvent>,
    controller: &MouseController,
    auto_engage: bool,
) {
    let mut engage = RisingEdge::default();
    let mut disengage = RisingEdge::default();
    let mut last_status = controller.status();

    while running.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match event {
            AppEvent::Sensor(SensorEvent::Connected { port, baud, name }) => {
                debug!("Sensor '{}' streaming on {} at {} baud", name, port, baud);
                if auto_engage {
                    info!("Sensor '{}' ready, engaging", name);
                    controller.connect();
                }
            }
            AppEvent::Sensor(SensorEvent::Reading(sample)) => {
                let was_connected = controller.is_connected();
                let engage_pressed = engage.update(sample.button_a_receiver);
                let disengage_pressed = disengage.update(sample.button_b_receiver);
                if disengage_pressed && was_connected {
                    info!("Receiver button B pressed, releasing pointer");
                    controller.disconnect();
                } else if engage_pressed && !was_connected {
                    info!("Receiver button A pressed, engaging");
                    controller.connect();
                }

                let status = controller.status();
                if status.heading != last_status.heading || status.vertical != last_status.vertical
                {
                    debug!(
                        "Heading {} ({:+.0}), vertical {} ({:+.1})",
                        status.heading,
                        status.heading_offset,
                        status.vertical,
                        status.vertical_offset
                    );
                }
                last_status = status;
            }
            AppEvent::Sensor(SensorEvent::Raw(_)) => {}
            AppEvent::Sensor(SensorEvent::Failed(reason)) => {
                error!("❌ Sensor failed: {}", reason);
            }
            AppEvent::Sensor(SensorEvent::Disconnected { port, name }) => {
                info!("Sensor '{}' on {} disconnected", name, port);
                break;
            }
            AppEvent::Pointer(event) => controller.handle_pointer_event(&event),
        }
    }
}

/// Print sensor output to stdout
fn run_monitor(config: AppConfig, raw: bool) -> Result<()> {
    let running = install_ctrlc()?;
    let info = config.sensor_info();
    let port = info.port.clone();

    let (listener, rx) = ChannelListener::new(EVENT_CAPACITY);
    let listener = if raw {
        listener.intercepting_raw()
    } else {
        listener
    };

    info!("📡 Monitoring {} at {} baud", info.port, info.baud);
    let transport = open_serial(&info.port, info.baud)?;
    let reader = SensorReader::spawn(transport, info, Arc::new(listener))?;

    while running.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match event {
            AppEvent::Sensor(SensorEvent::Reading(sample)) => {
                println!("{}", serde_json::to_string(&sample)?);
                if sample.button_a_receiver {
                    info!("Receiver button A pressed, stopping");
                    break;
                }
            }
            AppEvent::Sensor(SensorEvent::Raw(frame)) => {
                println!("{}: {}", port, frame);
                if receiver_a_pressed(&frame) {
                    info!("Receiver button A pressed, stopping");
                    break;
                }
            }
            AppEvent::Sensor(SensorEvent::Connected { .. }) => println!("{}: Connected", port),
            AppEvent::Sensor(SensorEvent::Disconnected { .. }) => {
                println!("{}: Disconnected", port);
                break;
            }
            AppEvent::Sensor(SensorEvent::Failed(reason)) => error!("❌ {}", reason),
            AppEvent::Pointer(_) => {}
        }
    }

    reader.close();
    reader.join();
    Ok(())
}

fn receiver_a_pressed(frame: &str) -> bool {
    frame
        .split(shared::protocol::FIELD_SEPARATOR)
        .nth(RECEIVER_A_FIELD)
        .is_some_and(|field| field.trim().starts_with('1'))
}

fn list_ports() -> Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let kind = match port.port_type {
            SerialPortType::UsbPort(usb) => format!(
                "USB {:04x}:{:04x} {}",
                usb.vid,
                usb.pid,
                usb.product.unwrap_or_default()
            ),
            SerialPortType::PciPort => "PCI".to_string(),
            SerialPortType::BluetoothPort => "Bluetooth".to_string(),
            SerialPortType::Unknown => "Unknown".to_string(),
        };
        println!("{}\t{}", port.port_name, kind);
    }
    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the calibration to suit the wearer, then run:");
    println!("   headmouse --config {}", output_path.display());

    Ok(())
}
