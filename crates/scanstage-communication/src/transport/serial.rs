//! Serial port transport implementation
//!
//! Provides the hardware-backed [`LineTransport`] for USB/RS-232 connected
//! motion controllers, plus port enumeration filtered to device names that
//! look like CNC-class controllers.

use super::{ConnectionParams, LineTransport, TransportResult};
use scanstage_core::TransportError;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,
}

/// List available serial ports on the system.
///
/// Filters to port names matching controller patterns:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> TransportResult<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        TransportError::ReadFailed {
            reason: format!("port enumeration failed: {}", e),
        }
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_controller_port(&port.port_name))
        .map(|port| {
            let (manufacturer, serial_number) = match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    (usb.manufacturer.clone(), usb.serial_number.clone())
                }
                _ => (None, None),
            };
            SerialPortInfo {
                port_name: port.port_name.clone(),
                description: describe_port(port),
                manufacturer,
                serial_number,
            }
        })
        .collect())
}

/// Check if a port name matches controller device patterns
fn is_controller_port(port_name: &str) -> bool {
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }

    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }

    false
}

/// Get a user-friendly description for a port
fn describe_port(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Hardware-backed transport using the `serialport` crate.
///
/// Owned by the protocol client's reader task; partial lines between reads
/// accumulate in an internal buffer until a terminator arrives.
pub struct SerialTransport {
    port: Option<Box<dyn serialport::SerialPort>>,
    port_name: String,
    buffer: Vec<u8>,
}

impl SerialTransport {
    /// Open a serial port with the given parameters
    pub fn open(params: &ConnectionParams) -> TransportResult<Self> {
        let port = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.read_timeout_ms))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                match e.kind {
                    serialport::ErrorKind::NoDevice => TransportError::PortNotFound {
                        port: params.port.clone(),
                    },
                    _ => TransportError::FailedToOpen {
                        port: params.port.clone(),
                        reason: e.to_string(),
                    },
                }
            })?;

        tracing::info!("Opened {} at {} baud", params.port, params.baud_rate);
        Ok(Self {
            port: Some(port),
            port_name: params.port.clone(),
            buffer: Vec::with_capacity(256),
        })
    }

    /// Name of the underlying port
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop(); // strip '\n'
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl LineTransport for SerialTransport {
    fn read_line(&mut self) -> TransportResult<Option<String>> {
        // A complete line may already be buffered from the previous read.
        if let Some(line) = self.take_buffered_line() {
            return Ok(Some(line));
        }

        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        let mut chunk = [0u8; 256];
        match port.read(&mut chunk) {
            Ok(0) => Ok(None),
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                Ok(self.take_buffered_line())
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(None)
            }
            Err(e) => Err(TransportError::ReadFailed {
                reason: e.to_string(),
            }),
        }
    }

    fn write_line(&mut self, line: &str) -> TransportResult<()> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(line.as_bytes())
            .and_then(|_| port.write_all(b"\n"))
            .and_then(|_| port.flush())
            .map_err(|e| TransportError::WriteFailed {
                reason: e.to_string(),
            })
    }

    fn write_raw(&mut self, bytes: &[u8]) -> TransportResult<()> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| TransportError::WriteFailed {
                reason: e.to_string(),
            })
    }

    fn close(&mut self) -> TransportResult<()> {
        if self.port.take().is_some() {
            tracing::info!("Closed {}", self.port_name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_port_patterns() {
        assert!(is_controller_port("COM3"));
        assert!(is_controller_port("/dev/ttyUSB0"));
        assert!(is_controller_port("/dev/ttyACM1"));
        assert!(is_controller_port("/dev/cu.usbmodem14201"));
        assert!(!is_controller_port("/dev/ttyS0"));
        assert!(!is_controller_port("COMX"));
        assert!(!is_controller_port("/dev/random"));
    }
}
