use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;

use super::payload::{PayloadError, PayloadReader, PayloadWriter, WirePayload};

const MAX_FIRMWARE_MAJOR: u16 = 0x07FF;
const MAX_FIRMWARE_MINOR: u8 = 0x1F;

/// Errors returned when building identity values.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DescriptorError {
    #[error("`{value}` is not a MAC address; expected six hex pairs separated by `:` or `-`")]
    InvalidMac { value: String },
    #[error("firmware version {major}.{minor} is out of range; major must be <= 2047 and minor <= 31")]
    FirmwareVersionOutOfRange { major: u16, minor: u8 },
}

/// Six-byte module MAC address.
///
/// Rendered as colon-separated uppercase hex pairs.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, SerializeDisplay, DeserializeFromStr,
)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    #[must_use]
    pub const fn octets(self) -> [u8; 6] {
        self.0
    }

    /// Returns the address with `-` separators, safe for file names.
    ///
    /// ```
    /// use summit::MacAddress;
    ///
    /// let mac = MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, 0x1F]);
    /// assert_eq!("02-EA-00-00-00-1F", mac.file_stem());
    /// ```
    #[must_use]
    pub fn file_stem(self) -> String {
        self.to_string().replace(':', "-")
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = DescriptorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || DescriptorError::InvalidMac {
            value: value.to_string(),
        };
        let mut octets = [0u8; 6];
        let mut parts = value.trim().split([':', '-']);
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_error| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl WirePayload for MacAddress {
    fn encode(&self, out: &mut PayloadWriter) {
        out.bytes(&self.0);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        input.array().map(Self)
    }
}

/// Firmware version packed as `major:11 | minor:5` in one 16-bit field.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize)]
pub struct FirmwareVersion {
    major: u16,
    minor: u8,
}

impl FirmwareVersion {
    /// Creates a version, validating both fields fit their bit widths.
    ///
    /// ```
    /// use summit::FirmwareVersion;
    ///
    /// let version = FirmwareVersion::new(2, 17)?;
    /// assert_eq!(0x0051, version.raw());
    /// assert_eq!(version, FirmwareVersion::from_raw(0x0051));
    /// # Ok::<(), summit::DescriptorError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if `major > 2047` or `minor > 31`.
    pub fn new(major: u16, minor: u8) -> Result<Self, DescriptorError> {
        if major > MAX_FIRMWARE_MAJOR || minor > MAX_FIRMWARE_MINOR {
            return Err(DescriptorError::FirmwareVersionOutOfRange { major, minor });
        }
        Ok(Self { major, minor })
    }

    /// Unpacks a raw 16-bit field.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self {
            major: raw >> 5,
            minor: (raw & 0x1F) as u8,
        }
    }

    /// Packs this version into its raw 16-bit form.
    #[must_use]
    pub const fn raw(self) -> u16 {
        (self.major << 5) | self.minor as u16
    }

    #[must_use]
    pub const fn major(self) -> u16 {
        self.major
    }

    #[must_use]
    pub const fn minor(self) -> u8 {
        self.minor
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl WirePayload for FirmwareVersion {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u16(self.raw());
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        input.u16().map(Self::from_raw)
    }
}

/// Descriptor selector used by master, speaker and local info queries.
///
/// The first four kinds decode into typed descriptors. The rest are
/// firmware-defined records handed back as raw bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, strum_macros::Display)]
pub enum InfoKind {
    #[strum(to_string = "operating_state")]
    OperatingState,
    #[strum(to_string = "module_descriptor")]
    ModuleDescriptor,
    #[strum(to_string = "speaker_descriptor")]
    SpeakerDescriptor,
    #[strum(to_string = "wisa_descriptor")]
    WisaDescriptor,
    #[strum(to_string = "amplifier_descriptor")]
    AmplifierDescriptor,
    #[strum(to_string = "coefficient_info")]
    CoefficientInfo,
    #[strum(to_string = "network_statistics")]
    NetworkStatistics,
    #[strum(to_string = "key_status")]
    KeyStatus,
}

impl InfoKind {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::OperatingState => 0,
            Self::ModuleDescriptor => 1,
            Self::SpeakerDescriptor => 2,
            Self::WisaDescriptor => 3,
            Self::AmplifierDescriptor => 4,
            Self::CoefficientInfo => 5,
            Self::NetworkStatistics => 7,
            Self::KeyStatus => 8,
        }
    }

    /// Resolves a raw selector byte.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::OperatingState),
            1 => Some(Self::ModuleDescriptor),
            2 => Some(Self::SpeakerDescriptor),
            3 => Some(Self::WisaDescriptor),
            4 => Some(Self::AmplifierDescriptor),
            5 => Some(Self::CoefficientInfo),
            7 => Some(Self::NetworkStatistics),
            8 => Some(Self::KeyStatus),
            _ => None,
        }
    }

    /// Returns whether this kind is a raw firmware record rather than a
    /// typed descriptor.
    #[must_use]
    pub const fn is_record(self) -> bool {
        matches!(
            self,
            Self::WisaDescriptor
                | Self::AmplifierDescriptor
                | Self::CoefficientInfo
                | Self::KeyStatus
        )
    }
}

/// Which coefficient set a [`InfoKind::CoefficientInfo`] record describes.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, strum_macros::Display)]
pub enum CoefficientSet {
    /// Defaults shared by every table.
    #[default]
    #[strum(to_string = "global")]
    Global,
    /// The table currently selected.
    #[strum(to_string = "current")]
    Current,
}

impl CoefficientSet {
    /// Descriptor index byte sent with the query.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::Global => 0,
            Self::Current => 1,
        }
    }
}

impl WirePayload for InfoKind {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(self.code());
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        let code = input.u8()?;
        Self::from_code(code).ok_or(PayloadError::InvalidValue {
            field: "info_kind",
            value: u32::from(code),
        })
    }
}

/// Hardware identity of one radio module.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct ModuleDescriptor {
    pub module_id: u16,
    pub hardware_type: u8,
    pub hardware_revision: u8,
    pub firmware_version: FirmwareVersion,
    pub mac: MacAddress,
}

impl WirePayload for ModuleDescriptor {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u16(self.module_id)
            .u8(self.hardware_type)
            .u8(self.hardware_revision);
        self.firmware_version.encode(out);
        self.mac.encode(out);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            module_id: input.u16()?,
            hardware_type: input.u8()?,
            hardware_revision: input.u8()?,
            firmware_version: FirmwareVersion::decode(input)?,
            mac: MacAddress::decode(input)?,
        })
    }
}

/// Speaker placement and type as held by a slave module.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct SpeakerDescriptor {
    pub speaker_type: u8,
    pub slot_index: u8,
    pub zone: u8,
    pub channel_map: u8,
}

impl WirePayload for SpeakerDescriptor {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(self.speaker_type)
            .u8(self.slot_index)
            .u8(self.zone)
            .u8(self.channel_map);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            speaker_type: input.u8()?,
            slot_index: input.u8()?,
            zone: input.u8()?,
            channel_map: input.u8()?,
        })
    }
}

/// Master module identity plus network limits.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct MasterDescriptor {
    pub module: ModuleDescriptor,
    pub max_speakers: u8,
    pub network_id: u16,
}

impl WirePayload for MasterDescriptor {
    fn encode(&self, out: &mut PayloadWriter) {
        self.module.encode(out);
        out.u8(self.max_speakers).u16(self.network_id);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            module: ModuleDescriptor::decode(input)?,
            max_speakers: input.u8()?,
            network_id: input.u16()?,
        })
    }
}

/// Network operating state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct OperatingState {
    pub mode: u8,
    pub radio_channel: u16,
    pub associated_speakers: u8,
}

impl WirePayload for OperatingState {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(self.mode)
            .u16(self.radio_channel)
            .u8(self.associated_speakers);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            mode: input.u8()?,
            radio_channel: input.u16()?,
            associated_speakers: input.u8()?,
        })
    }
}

/// Link counters kept by each module.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct NetworkStatistics {
    pub packets_sent: u32,
    pub packet_receive_errors: [u32; 4],
    pub retransmissions: u32,
}

impl WirePayload for NetworkStatistics {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u32(self.packets_sent);
        for errors in self.packet_receive_errors {
            out.u32(errors);
        }
        out.u32(self.retransmissions);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        let packets_sent = input.u32()?;
        let mut packet_receive_errors = [0u32; 4];
        for errors in &mut packet_receive_errors {
            *errors = input.u32()?;
        }
        Ok(Self {
            packets_sent,
            packet_receive_errors,
            retransmissions: input.u32()?,
        })
    }
}

/// Receive-quality counters and the last packet's signal level.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct RxStatistics {
    pub total_packets: u32,
    pub crc_errors: u32,
    pub missed_packets: u32,
    pub last_rssi: u8,
}

impl WirePayload for RxStatistics {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u32(self.total_packets)
            .u32(self.crc_errors)
            .u32(self.missed_packets)
            .u8(self.last_rssi);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            total_packets: input.u32()?,
            crc_errors: input.u32()?,
            missed_packets: input.u32()?,
            last_rssi: input.u8()?,
        })
    }
}

/// System log clock information.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct TimeInfo {
    pub uptime_seconds: u32,
    pub log_entries: u16,
}

impl WirePayload for TimeInfo {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u32(self.uptime_seconds).u16(self.log_entries);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            uptime_seconds: input.u32()?,
            log_entries: input.u16()?,
        })
    }
}

/// Antennas selected while answering an echo.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct EchoResult {
    pub tx_antenna: u8,
    pub rx_antenna: u8,
}

impl WirePayload for EchoResult {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(self.tx_antenna).u8(self.rx_antenna);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            tx_antenna: input.u8()?,
            rx_antenna: input.u8()?,
        })
    }
}

/// Dynamic frequency selection engine state.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct DfsEngineState {
    pub enabled: bool,
    pub current_channel: u16,
    pub radar_events: u16,
}

impl WirePayload for DfsEngineState {
    fn encode(&self, out: &mut PayloadWriter) {
        self.enabled.encode(out);
        out.u16(self.current_channel).u16(self.radar_events);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            enabled: bool::decode(input)?,
            current_channel: input.u16()?,
            radar_events: input.u16()?,
        })
    }
}

/// Static DFS channel list: a count byte followed by 16-bit channels.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct ChannelList(pub Vec<u16>);

impl WirePayload for ChannelList {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(u8::try_from(self.0.len()).unwrap_or(u8::MAX));
        for channel in self.0.iter().take(usize::from(u8::MAX)) {
            out.u16(*channel);
        }
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        let count = input.u8()?;
        (0..count)
            .map(|_index| input.u16())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}
