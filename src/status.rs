use std::fmt;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use crate::protocol::DeviceClass;

/// Raw status byte that denotes success for every command.
pub const SUCCESS_CODE: u8 = 0x01;

const UNKNOWN_ERROR: &str = "Unknown Error";

/// How the retry layer should react to a link-level fault.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum FaultClass {
    /// Nothing usable came back; issuing the request again is enough.
    #[strum(to_string = "retryable")]
    Retryable,
    /// Garbage came back; the next exchange starts from flushed input.
    #[strum(to_string = "desync")]
    Desync,
    /// The medium is gone; retrying cannot help.
    #[strum(to_string = "fatal")]
    Fatal,
}

/// Link-level faults raised by transports and the framer.
///
/// Each medium owns its own code range: serial `0xE1..=0xE5` and `0xE9`,
/// USB `0xE6..=0xE8`, I2C `0xD1..=0xD3`. `0xEA` is shared by all media.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum LinkFault {
    #[strum(to_string = "serial write failed")]
    WriteFailed,
    #[strum(to_string = "response header truncated")]
    HeaderTruncated,
    #[strum(to_string = "response payload truncated")]
    PayloadTruncated,
    #[strum(to_string = "malformed response packet")]
    MalformedPacket,
    #[strum(to_string = "lost frame synchronisation")]
    SyncLost,
    #[strum(to_string = "USB control write failed")]
    UsbWriteFailed,
    #[strum(to_string = "USB control read failed")]
    UsbReadFailed,
    #[strum(to_string = "malformed USB response packet")]
    UsbMalformed,
    #[strum(to_string = "serial read timed out")]
    ReadTimeout,
    #[strum(to_string = "port is closed")]
    PortClosed,
    #[strum(to_string = "I2C write failed")]
    I2cWriteFailed,
    #[strum(to_string = "I2C read failed")]
    I2cReadFailed,
    #[strum(to_string = "malformed I2C response packet")]
    I2cMalformed,
}

impl LinkFault {
    /// Returns the reserved status byte for this fault.
    ///
    /// ```
    /// use summit::LinkFault;
    ///
    /// assert_eq!(0xE2, LinkFault::HeaderTruncated.code());
    /// assert_eq!(0xE7, LinkFault::UsbReadFailed.code());
    /// ```
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::WriteFailed => 0xE1,
            Self::HeaderTruncated => 0xE2,
            Self::PayloadTruncated => 0xE3,
            Self::MalformedPacket => 0xE4,
            Self::SyncLost => 0xE5,
            Self::UsbWriteFailed => 0xE6,
            Self::UsbReadFailed => 0xE7,
            Self::UsbMalformed => 0xE8,
            Self::ReadTimeout => 0xE9,
            Self::PortClosed => 0xEA,
            Self::I2cWriteFailed => 0xD1,
            Self::I2cReadFailed => 0xD2,
            Self::I2cMalformed => 0xD3,
        }
    }

    /// Resolves a reserved status byte back into a link fault.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::iter().find(|fault| fault.code() == code)
    }

    /// Returns how the retry layer should treat this fault.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::WriteFailed
            | Self::UsbWriteFailed
            | Self::UsbReadFailed
            | Self::ReadTimeout
            | Self::I2cWriteFailed
            | Self::I2cReadFailed => FaultClass::Retryable,
            Self::HeaderTruncated
            | Self::PayloadTruncated
            | Self::MalformedPacket
            | Self::SyncLost
            | Self::UsbMalformed
            | Self::I2cMalformed => FaultClass::Desync,
            Self::PortClosed => FaultClass::Fatal,
        }
    }
}

/// Result of one command exchange.
///
/// Transport, framing and device errors are all ordinary values of this type;
/// only local validation failures are reported through `Err`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Status {
    /// The device reported `0x01`.
    Success,
    /// The device answered with a non-success status byte.
    Device(u8),
    /// The exchange failed below the device protocol.
    Link(LinkFault),
}

impl Status {
    /// Classifies a status byte reported by a device.
    ///
    /// Link faults are only ever raised by the host, so a device byte in the
    /// reserved link range is still a device status.
    ///
    /// ```
    /// use summit::Status;
    ///
    /// assert_eq!(Status::Success, Status::from_code(0x01));
    /// assert_eq!(Status::Device(0x03), Status::from_code(0x03));
    /// assert_eq!(Status::Device(0xEA), Status::from_code(0xEA));
    /// ```
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        if code == SUCCESS_CODE {
            Self::Success
        } else {
            Self::Device(code)
        }
    }

    /// Returns the raw status byte.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => SUCCESS_CODE,
            Self::Device(code) => code,
            Self::Link(fault) => fault.code(),
        }
    }

    /// Returns whether this status denotes success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns the fault class for link faults; device statuses have none.
    #[must_use]
    pub const fn fault_class(self) -> Option<FaultClass> {
        match self {
            Self::Link(fault) => Some(fault.class()),
            Self::Success | Self::Device(_) => None,
        }
    }

    /// Decodes this status into a human-readable description.
    ///
    /// Device codes are resolved through the table for `class`; codes missing
    /// from that table describe as `"Unknown Error"`.
    ///
    /// ```
    /// use summit::{DeviceClass, Status};
    ///
    /// assert_eq!("Success", Status::Success.describe(DeviceClass::Master));
    /// assert_eq!("Unknown Error", Status::Device(0x7F).describe(DeviceClass::Slave));
    /// ```
    #[must_use]
    pub fn describe(self, class: DeviceClass) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Link(fault) => link_description(fault),
            Self::Device(code) => device_description(class, code).unwrap_or(UNKNOWN_ERROR),
        }
    }

    /// Renders a one-line report naming the failing command.
    ///
    /// ```
    /// use summit::{DeviceClass, Status};
    ///
    /// assert_eq!(
    ///     "rd -- Invalid parameter (0x03)",
    ///     Status::Device(0x03).report(DeviceClass::Slave, "rd"),
    /// );
    /// ```
    #[must_use]
    pub fn report(self, class: DeviceClass, command: &str) -> String {
        format!("{command} -- {} (0x{:02X})", self.describe(class), self.code())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.code())
    }
}

impl From<LinkFault> for Status {
    fn from(fault: LinkFault) -> Self {
        Self::Link(fault)
    }
}

fn link_description(fault: LinkFault) -> &'static str {
    match fault {
        LinkFault::WriteFailed => "Serial port write failed",
        LinkFault::HeaderTruncated => "Serial read header length error",
        LinkFault::PayloadTruncated => "Serial read payload length error",
        LinkFault::MalformedPacket => "Serial malformed packet",
        LinkFault::SyncLost => "Serial sync byte not found",
        LinkFault::UsbWriteFailed => "USB control write failed",
        LinkFault::UsbReadFailed => "USB control read failed",
        LinkFault::UsbMalformed => "USB malformed packet",
        LinkFault::ReadTimeout => "Serial read timeout",
        LinkFault::PortClosed => "Port closed",
        LinkFault::I2cWriteFailed => "I2C write failed",
        LinkFault::I2cReadFailed => "I2C read failed",
        LinkFault::I2cMalformed => "I2C malformed packet",
    }
}

fn device_description(class: DeviceClass, code: u8) -> Option<&'static str> {
    let common = match code {
        0x00 => Some("No response status"),
        0x02 => Some("Invalid command or no action taken"),
        0x03 => Some("Invalid parameter"),
        0x04 => Some("Command not allowed in current state"),
        0x05 => Some("Device busy"),
        0x06 => Some("Flash operation failed"),
        0x07 => Some("Firmware image verification failed"),
        0x08 => Some("Buffer overflow"),
        0x09 => Some("Command timed out on device"),
        _ => None,
    };
    if common.is_some() {
        return common;
    }

    match (class, code) {
        (DeviceClass::Master, 0x10) => Some("Speaker not found"),
        (DeviceClass::Master, 0x11) => Some("Network not established"),
        (DeviceClass::Master, 0x12) => Some("Speaker slot already assigned"),
        (DeviceClass::Master, 0x13) => Some("Zone capacity exceeded"),
        (DeviceClass::Master, 0x14) => Some("Speaker did not respond"),
        (DeviceClass::Master, 0x15) => Some("Radar detected on channel"),
        (DeviceClass::Slave, 0x20) => Some("Speaker not associated"),
        (DeviceClass::Slave, 0x21) => Some("Coefficient table invalid"),
        (DeviceClass::Slave, 0x22) => Some("Manufacturing data invalid"),
        (DeviceClass::Slave, 0x23) => Some("Audio path not ready"),
        _ => None,
    }
}
