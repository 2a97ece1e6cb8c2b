use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::device::SlaveDevice;
use super::session::{Session, SessionSettings};
use super::transport::Transport;
use crate::datalog::DatalogSink;
use crate::handlers::{CommandError, MacAddress, RegisterHandler};
use crate::protocol::DeviceClass;

/// Deadline for the single identity read sent to each candidate port.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);
/// Bytes written to a port that passed the identity read but failed the
/// descriptor reads, leaving its console at a fresh prompt.
const REJECT_BYTES: &[u8] = b"\n\n";

/// How [`DeviceDirectory::set_coms`] builds its devices.
#[derive(Debug, Clone, Builder)]
pub struct ProbeOptions {
    /// Drop ports that do not identify as Summit slaves.
    #[builder(default = true)]
    prune: bool,
    #[builder(default = DEFAULT_PROBE_TIMEOUT)]
    probe_timeout: Duration,
    /// Policy applied to every device session.
    #[builder(default)]
    settings: SessionSettings,
    datalog: Option<Arc<dyn DatalogSink>>,
    /// Directory for raw capture logs, enabled once a device is identified.
    capture_dir: Option<PathBuf>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Errors returned when parsing a [`DeviceSelector`].
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DeviceSelectorError {
    #[error("`{value}` is neither a device index nor a MAC address")]
    Invalid { value: String },
}

/// Picks one device by position or by MAC.
///
/// ```
/// use summit::{DeviceSelector, MacAddress};
///
/// assert_eq!(DeviceSelector::Index(3), "3".parse()?);
/// assert_eq!(
///     DeviceSelector::Mac(MacAddress::new([0x02, 0xEA, 0, 0, 0, 0x01])),
///     "02:EA:00:00:00:01".parse()?,
/// );
/// # Ok::<(), summit::DeviceSelectorError>(())
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeviceSelector {
    Index(usize),
    Mac(MacAddress),
}

impl FromStr for DeviceSelector {
    type Err = DeviceSelectorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Ok(index) = value.trim().parse() {
            return Ok(Self::Index(index));
        }
        value
            .parse()
            .map(Self::Mac)
            .map_err(|_error| DeviceSelectorError::Invalid {
                value: value.to_string(),
            })
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Mac(mac) => write!(f, "{mac}"),
        }
    }
}

/// The set of known slave devices.
///
/// Lookups hand out `&SlaveDevice` references; there is no shared cursor,
/// so independent iterations never disturb one another.
#[derive(Debug, Default)]
pub struct DeviceDirectory {
    devices: Vec<SlaveDevice>,
}

impl DeviceDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the directory with one device per transport.
    ///
    /// Current sessions are closed first. With pruning enabled each port must
    /// open, answer the identity probe, and return both descriptors. Ports that
    /// fail the identity read are closed; ports that pass it but fail a
    /// descriptor read are also sent two newlines. Returns the number of
    /// devices kept.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures in the probe.
    #[instrument(
        skip_all,
        level = "info",
        fields(candidates = transports.len(), prune = options.prune)
    )]
    pub async fn set_coms(
        &mut self,
        transports: Vec<Box<dyn Transport>>,
        options: &ProbeOptions,
    ) -> Result<usize, CommandError> {
        self.close_all().await;

        for transport in transports {
            let mut session =
                Session::new(DeviceClass::Slave, transport).with_settings(options.settings);
            if let Some(sink) = &options.datalog {
                session = session.with_datalog(Arc::clone(sink));
            }
            let opened = session.open().await;

            if !options.prune {
                if !opened {
                    debug!(port = session.label(), "port did not open");
                }
                self.devices.push(SlaveDevice::new(session, None));
                continue;
            }
            if !opened {
                debug!(port = session.label(), "port did not open; dropping it");
                continue;
            }

            if !RegisterHandler::identify(&session, options.probe_timeout).await? {
                debug!(port = session.label(), "port is not a Summit slave");
                session.close().await;
                continue;
            }
            let Some(identity) = SlaveDevice::read_identity(&session).await? else {
                debug!(port = session.label(), "slave did not return its descriptors");
                session.write_raw(REJECT_BYTES).await;
                session.close().await;
                continue;
            };

            let device = SlaveDevice::new(session, Some(identity));
            if let Some(dir) = &options.capture_dir {
                device.session().enable_capture(dir);
            }
            info!(
                port = device.label(),
                mac = %identity.module.mac,
                firmware = %identity.module.firmware_version,
                "slave found"
            );
            self.devices.push(device);
        }

        Ok(self.devices.len())
    }

    /// Closes and forgets every device.
    pub async fn close_all(&mut self) {
        for device in self.devices.drain(..) {
            device.into_session().close().await;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SlaveDevice> {
        self.devices.get(index)
    }

    #[must_use]
    pub fn by_mac(&self, mac: MacAddress) -> Option<&SlaveDevice> {
        self.devices.iter().find(|device| device.mac() == Some(mac))
    }

    #[must_use]
    pub fn position(&self, mac: MacAddress) -> Option<usize> {
        self.devices.iter().position(|device| device.mac() == Some(mac))
    }

    #[must_use]
    pub fn contains(&self, mac: MacAddress) -> bool {
        self.position(mac).is_some()
    }

    #[must_use]
    pub fn select(&self, selector: DeviceSelector) -> Option<&SlaveDevice> {
        match selector {
            DeviceSelector::Index(index) => self.get(index),
            DeviceSelector::Mac(mac) => self.by_mac(mac),
        }
    }

    /// Removes the selected device from the directory and hands it over.
    pub fn take(&mut self, selector: DeviceSelector) -> Option<SlaveDevice> {
        let index = match selector {
            DeviceSelector::Index(index) => (index < self.devices.len()).then_some(index)?,
            DeviceSelector::Mac(mac) => self.position(mac)?,
        };
        Some(self.devices.remove(index))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SlaveDevice> {
        self.devices.iter()
    }

    /// MACs of every identified device, in directory order.
    #[must_use]
    pub fn macs(&self) -> Vec<MacAddress> {
        self.devices.iter().filter_map(SlaveDevice::mac).collect()
    }
}

impl<'a> IntoIterator for &'a DeviceDirectory {
    type Item = &'a SlaveDevice;
    type IntoIter = std::slice::Iter<'a, SlaveDevice>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::handlers::Frame;
    use crate::hw::{FakeJournal, FakeReply, FakeResponder, FakeTransport, SimulatedDevice};
    use crate::protocol::CommandId;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, last])
    }

    fn slave(last: u8) -> (SimulatedDevice, Box<dyn Transport>) {
        let device = SimulatedDevice::slave(mac(last));
        let transport = device.transport(format!("tty{last}"));
        (device, Box::new(transport))
    }

    fn silent(name: &str) -> (FakeJournal, Box<dyn Transport>) {
        let transport = FakeTransport::silent(name);
        (transport.journal(), Box::new(transport))
    }

    #[tokio::test]
    async fn prune_keeps_only_identified_slaves_in_order() {
        let (_first, first) = slave(1);
        let (modem_journal, modem) = silent("modem");
        let (_second, second) = slave(2);
        let mut directory = DeviceDirectory::new();

        let kept = directory
            .set_coms(vec![first, modem, second], &ProbeOptions::default())
            .await
            .expect("probe should validate");

        assert_eq!(2, kept);
        assert_eq!(vec![mac(1), mac(2)], directory.macs());
        assert_eq!(Some(1), directory.position(mac(2)));
        assert_eq!(
            Some("tty2"),
            directory.select(DeviceSelector::Index(1)).map(SlaveDevice::label)
        );
        assert!(non_frame_writes(&modem_journal).is_empty());
        assert_eq!(1, modem_journal.close_count());
    }

    #[tokio::test]
    async fn slave_without_descriptors_is_left_at_a_fresh_prompt() {
        let mut device = SimulatedDevice::slave(mac(10));
        let info = CommandId::GetLocalInfo.metadata().opcode();
        let transport = FakeTransport::new("tty10", move |request: &Frame| {
            if request.opcode() == info {
                return FakeReply::Frame(Frame::response_to(request, 0x02, Vec::new()));
            }
            device.respond(request)
        });
        let journal = transport.journal();
        let mut directory = DeviceDirectory::new();

        let kept = directory
            .set_coms(vec![Box::new(transport)], &ProbeOptions::default())
            .await
            .expect("probe should validate");

        assert_eq!(0, kept);
        assert_eq!(vec![b"\n\n".to_vec()], non_frame_writes(&journal));
        assert_eq!(1, journal.close_count());
    }

    #[tokio::test]
    async fn identity_probe_is_a_single_attempt() {
        let (journal, modem) = silent("modem");
        let mut directory = DeviceDirectory::new();

        directory
            .set_coms(vec![modem], &ProbeOptions::default())
            .await
            .expect("probe should validate");

        assert!(directory.is_empty());
        assert_eq!(1, journal.frame_count());
    }

    #[tokio::test]
    async fn without_prune_every_port_is_kept() {
        let (journal, modem) = silent("modem");
        let (_device, port) = slave(3);
        let mut directory = DeviceDirectory::new();

        let kept = directory
            .set_coms(
                vec![modem, port],
                &ProbeOptions::builder().prune(false).build(),
            )
            .await
            .expect("set_coms should validate");

        assert_eq!(2, kept);
        assert_eq!(0, journal.frame_count());
        assert_eq!(None, directory.get(0).and_then(SlaveDevice::mac));
    }

    #[tokio::test]
    async fn set_coms_closes_previous_sessions() {
        let device = SimulatedDevice::slave(mac(4));
        let transport = device.transport("tty4");
        let journal = transport.journal();
        let mut directory = DeviceDirectory::new();
        directory
            .set_coms(vec![Box::new(transport)], &ProbeOptions::default())
            .await
            .expect("probe should validate");

        directory
            .set_coms(Vec::new(), &ProbeOptions::default())
            .await
            .expect("probe should validate");

        assert!(directory.is_empty());
        assert_eq!(1, journal.close_count());
    }

    #[tokio::test]
    async fn lookups_by_mac_and_selector_agree() {
        let (_first, first) = slave(5);
        let (_second, second) = slave(6);
        let mut directory = DeviceDirectory::new();
        directory
            .set_coms(vec![first, second], &ProbeOptions::default())
            .await
            .expect("probe should validate");

        let by_mac = directory.by_mac(mac(6)).map(SlaveDevice::label);
        let selected = directory
            .select(DeviceSelector::Mac(mac(6)))
            .map(SlaveDevice::label);

        assert_eq!(Some("tty6"), by_mac);
        assert_eq!(by_mac, selected);
        assert!(!directory.contains(mac(7)));
        assert_eq!(2, directory.iter().count());
        assert_eq!(2, (&directory).into_iter().count());
    }

    #[tokio::test]
    async fn take_hands_over_the_selected_device() {
        let (_first, first) = slave(8);
        let (_second, second) = slave(9);
        let mut directory = DeviceDirectory::new();
        directory
            .set_coms(vec![first, second], &ProbeOptions::default())
            .await
            .expect("probe should validate");

        let taken = directory.take(DeviceSelector::Mac(mac(9)));

        assert_eq!(Some(mac(9)), taken.as_ref().and_then(SlaveDevice::mac));
        assert_eq!(vec![mac(8)], directory.macs());
        assert!(directory.take(DeviceSelector::Index(1)).is_none());
    }

    #[test]
    fn selector_rejects_garbage() {
        assert_eq!(
            Err(DeviceSelectorError::Invalid {
                value: "speaker".to_string()
            }),
            "speaker".parse::<DeviceSelector>()
        );
    }

    fn non_frame_writes(journal: &FakeJournal) -> Vec<Vec<u8>> {
        journal
            .raw_writes()
            .into_iter()
            .filter(|bytes| bytes.first() != Some(&0x01))
            .collect()
    }
}
