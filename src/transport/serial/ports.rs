//! USB serial port discovery

use serialport::SerialPortType;
use tracing::{debug, warn};

/// What the platform told us about a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Usb,
    Other,
    Unknown,
}

impl From<&SerialPortType> for PortKind {
    fn from(port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(_) => PortKind::Usb,
            SerialPortType::PciPort | SerialPortType::BluetoothPort => PortKind::Other,
            SerialPortType::Unknown => PortKind::Unknown,
        }
    }
}

/// Port names USB serial adapters get on Linux, macOS and Windows
fn looks_like_usb_serial(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    base.starts_with("ttyUSB")
        || base.starts_with("ttyACM")
        || base.starts_with("cu.usb")
        || base.starts_with("COM")
}

/// Pick the ports a radio could be on (pure function)
///
/// Ports the platform reports as USB win. Without type information, fall back
/// to the usual USB serial device names.
pub fn select_usb_ports(ports: &[(String, PortKind)]) -> Vec<String> {
    let usb: Vec<String> = ports
        .iter()
        .filter(|(_, kind)| *kind == PortKind::Usb)
        .map(|(name, _)| name.clone())
        .collect();
    if !usb.is_empty() {
        return usb;
    }

    ports
        .iter()
        .filter(|(name, kind)| *kind == PortKind::Unknown && looks_like_usb_serial(name))
        .map(|(name, _)| name.clone())
        .collect()
}

/// USB serial ports currently attached
pub fn available_usb_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => {
            let classified: Vec<(String, PortKind)> = ports
                .iter()
                .map(|info| (info.port_name.clone(), PortKind::from(&info.port_type)))
                .collect();
            let selected = select_usb_ports(&classified);
            debug!(
                found = classified.len(),
                usb = selected.len(),
                "Enumerated serial ports"
            );
            selected
        }
        Err(e) => {
            warn!("Failed to enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}
