//! # Scanstage
//!
//! Controller for serial-driven multi-axis 3D scanning stages. Drives a
//! GRBL/FluidNC-class motion controller over a serial line and
//! coordinates it with image capture to execute multi-point scan
//! patterns.
//!
//! ## Architecture
//!
//! Scanstage is organized as a workspace with multiple crates:
//!
//! 1. **scanstage-core** - Core types, errors, motion interface, events
//! 2. **scanstage-communication** - Serial transport, protocol client,
//!    motion controller
//! 3. **scanstage-scan** - Scan patterns, collaborators, orchestrator
//! 4. **scanstage-settings** - Configuration loading and validation
//! 5. **scanstage** - Main binary that wires the crates together
//!
//! Control flows orchestrator → motion controller → protocol client →
//! transport → wire; machine status flows back the same path in reverse,
//! asynchronously, through the background reader.

pub use scanstage_communication::{
    list_ports, ConnectionParams, LineTransport, MotionConfig, MotionController, ProtocolClient,
    ProtocolConfig, SerialPortInfo, SerialTransport,
};

pub use scanstage_core::{
    event_bus, AppEvent, Axis, AxisLimits, ConnectionEvent, Error, EventCategory, EventFilter,
    MachineEvent, MachineLimits, MachineState, MotionControl, MotionError, Position, ProtocolError,
    Result, ScanError, ScanEvent, ScanPhase, StatusSnapshot, TransportError,
};

pub use scanstage_scan::{
    CylindricalPattern, GridPattern, NoOpCapture, NoOpLighting, NoOpStorage, PatternSpec,
    PointFailurePolicy, RunHandle, RunOutcome, ScanConfig, ScanOrchestrator, ScanPoint, ScanReport,
    ScanStatus,
};

pub use scanstage_settings::{Config, SettingsError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with console output and RUST_LOG
/// environment variable support.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

/// Open the configured serial port and stand up the motion stack.
///
/// Publishes the connection event and returns a controller ready for
/// homing and moves.
pub fn connect(config: &Config) -> Result<MotionController> {
    event_bus().publish(AppEvent::Connection(ConnectionEvent::Connecting {
        port: config.connection.port.clone(),
    }));

    let transport = SerialTransport::open(&config.connection)?;
    let client = ProtocolClient::connect(Box::new(transport), config.protocol.clone());

    event_bus().publish(AppEvent::Connection(ConnectionEvent::Connected {
        port: config.connection.port.clone(),
    }));

    Ok(MotionController::new(client, config.motion.clone()))
}
