use std::fmt;
use std::str::FromStr;

use tracing::info;

use super::fake_backend::{FakeTransport, SimulatedDevice};
use super::serial_backend::{SerialTransport, enumerate_serial_ports};
use super::transport::Transport;
use super::usb_backend::{SUMMIT_USB_PRODUCT_ID, SUMMIT_USB_VENDOR_ID, UsbTransport};
use crate::error::CliConfigError;
use crate::handlers::{FirmwareVersion, MacAddress, ModuleDescriptor, SpeakerDescriptor};

/// MAC given to the simulated master.
pub const FAKE_MASTER_MAC: MacAddress = MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, 0xF0]);
/// Name of the simulated port that never answers.
pub const FAKE_SILENT_PORT: &str = "fake-modem";

/// How the master module is reached.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MasterLink {
    Uart(String),
    Usb { vendor_id: u16, product_id: u16 },
}

impl Default for MasterLink {
    fn default() -> Self {
        Self::Usb {
            vendor_id: SUMMIT_USB_VENDOR_ID,
            product_id: SUMMIT_USB_PRODUCT_ID,
        }
    }
}

/// USB `VID:PID` pair in hex, as given on the command line.
///
/// ```
/// use summit::UsbId;
///
/// let id: UsbId = "2495:0016".parse()?;
/// assert_eq!((0x2495, 0x0016), (id.vendor_id, id.product_id));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct UsbId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl FromStr for UsbId {
    type Err = CliConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || CliConfigError::InvalidUsbId {
            value: value.to_string(),
        };
        let (vendor, product) = value.split_once(':').ok_or_else(invalid)?;
        let parse = |part: &str| {
            let digits = part.trim().trim_start_matches("0x");
            u16::from_str_radix(digits, 16).map_err(|_error| invalid())
        };
        Ok(Self {
            vendor_id: parse(vendor)?,
            product_id: parse(product)?,
        })
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

impl From<UsbId> for MasterLink {
    fn from(id: UsbId) -> Self {
        Self::Usb {
            vendor_id: id.vendor_id,
            product_id: id.product_id,
        }
    }
}

/// Supplies the transports a command runs against.
pub trait HardwareClient: Send + Sync {
    /// Transport for the master module, if one is configured.
    fn master_transport(&self) -> Option<Box<dyn Transport>>;

    /// Candidate transports for slave modules, unprobed.
    fn slave_transports(&self) -> Vec<Box<dyn Transport>>;

    /// Serial ports visible to this client.
    fn available_ports(&self) -> Vec<String>;
}

/// Transports on real hardware.
#[derive(Debug, Clone, Default)]
pub struct RealHardwareClient {
    master: Option<MasterLink>,
    ports: Vec<String>,
}

impl RealHardwareClient {
    /// Uses `master` for the master and `ports` as slave candidates. With no
    /// ports, every enumerated serial port is probed.
    #[must_use]
    pub fn new(master: Option<MasterLink>, ports: Vec<String>) -> Self {
        Self { master, ports }
    }
}

impl HardwareClient for RealHardwareClient {
    fn master_transport(&self) -> Option<Box<dyn Transport>> {
        let transport: Box<dyn Transport> = match self.master.as_ref()? {
            MasterLink::Uart(path) => Box::new(SerialTransport::new(path.clone())),
            MasterLink::Usb {
                vendor_id,
                product_id,
            } => Box::new(UsbTransport::new(*vendor_id, *product_id)),
        };
        Some(transport)
    }

    fn slave_transports(&self) -> Vec<Box<dyn Transport>> {
        let ports = if self.ports.is_empty() {
            enumerate_serial_ports()
        } else {
            self.ports.clone()
        };
        ports
            .into_iter()
            .map(|path| Box::new(SerialTransport::new(path)) as Box<dyn Transport>)
            .collect()
    }

    fn available_ports(&self) -> Vec<String> {
        enumerate_serial_ports()
    }
}

/// Simulated topology: one master with `slaves` networked speakers, the same
/// speakers as directly attached slaves, and one port that never answers.
#[derive(Debug, Clone)]
pub struct FakeHardwareClient {
    master: SimulatedDevice,
    slaves: Vec<SimulatedDevice>,
}

impl FakeHardwareClient {
    #[must_use]
    pub fn new(slave_count: u8) -> Self {
        info!(slave_count, "using simulated hardware");
        let slaves: Vec<SimulatedDevice> = (1..=slave_count)
            .map(|index| SimulatedDevice::slave(fake_slave_mac(index)))
            .collect();
        let master = slaves.iter().enumerate().fold(
            SimulatedDevice::master(FAKE_MASTER_MAC),
            |master, (slot, slave)| {
                let slot = u8::try_from(slot).unwrap_or(u8::MAX);
                master.with_network_speaker(fake_module(slave.mac()), fake_speaker(slot))
            },
        );
        Self { master, slaves }
    }

    /// Handle onto the simulated master, sharing its state.
    #[must_use]
    pub fn master(&self) -> &SimulatedDevice {
        &self.master
    }

    #[must_use]
    pub fn slaves(&self) -> &[SimulatedDevice] {
        &self.slaves
    }
}

/// MAC of the `index`-th simulated slave, counted from one.
#[must_use]
pub fn fake_slave_mac(index: u8) -> MacAddress {
    MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, index])
}

fn fake_module(mac: MacAddress) -> ModuleDescriptor {
    ModuleDescriptor {
        module_id: 0x0200,
        hardware_type: 0x01,
        hardware_revision: 0x03,
        firmware_version: FirmwareVersion::from_raw(0x0051),
        mac,
    }
}

fn fake_speaker(slot: u8) -> SpeakerDescriptor {
    SpeakerDescriptor {
        speaker_type: 0x02,
        slot_index: slot,
        zone: 0,
        channel_map: 0x01,
    }
}

impl HardwareClient for FakeHardwareClient {
    fn master_transport(&self) -> Option<Box<dyn Transport>> {
        Some(Box::new(self.master.transport("fake-master")))
    }

    fn slave_transports(&self) -> Vec<Box<dyn Transport>> {
        let mut transports: Vec<Box<dyn Transport>> = self
            .slaves
            .iter()
            .enumerate()
            .map(|(index, slave)| {
                Box::new(slave.transport(format!("fake{index}"))) as Box<dyn Transport>
            })
            .collect();
        transports.push(Box::new(FakeTransport::silent(FAKE_SILENT_PORT)));
        transports
    }

    fn available_ports(&self) -> Vec<String> {
        (0..self.slaves.len())
            .map(|index| format!("fake{index}"))
            .chain([FAKE_SILENT_PORT.to_string()])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("2495:0016", 0x2495, 0x0016)]
    #[case("0x1234:0xABCD", 0x1234, 0xABCD)]
    fn usb_ids_parse_as_hex(#[case] value: &str, #[case] vendor_id: u16, #[case] product_id: u16) {
        assert_eq!(
            UsbId {
                vendor_id,
                product_id
            },
            value.parse().expect("USB id should parse")
        );
    }

    #[test]
    fn usb_id_requires_a_separator() {
        assert_matches!(
            "24950016".parse::<UsbId>(),
            Err(CliConfigError::InvalidUsbId { .. })
        );
    }

    #[test]
    fn fake_client_lists_slaves_and_the_silent_port() {
        let client = FakeHardwareClient::new(2);

        assert_eq!(
            vec!["fake0", "fake1", FAKE_SILENT_PORT],
            client.available_ports()
        );
        assert_eq!(3, client.slave_transports().len());
        assert_eq!(fake_slave_mac(2), client.slaves()[1].mac());
    }
}
