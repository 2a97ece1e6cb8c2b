use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use strum_macros::Display;

use crate::status::LinkFault;

/// Physical medium carrying the protocol.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
pub enum Medium {
    #[strum(to_string = "uart")]
    Uart,
    #[strum(to_string = "usb")]
    Usb,
    #[strum(to_string = "i2c")]
    I2c,
}

impl Medium {
    /// Fault reported when a request could not be written completely.
    #[must_use]
    pub const fn write_fault(self) -> LinkFault {
        match self {
            Self::Uart => LinkFault::WriteFailed,
            Self::Usb => LinkFault::UsbWriteFailed,
            Self::I2c => LinkFault::I2cWriteFailed,
        }
    }

    /// Fault reported when nothing arrived before the deadline.
    #[must_use]
    pub const fn read_fault(self) -> LinkFault {
        match self {
            Self::Uart => LinkFault::ReadTimeout,
            Self::Usb => LinkFault::UsbReadFailed,
            Self::I2c => LinkFault::I2cReadFailed,
        }
    }

    /// Fault reported when a response could not be mapped to a message.
    #[must_use]
    pub const fn malformed_fault(self) -> LinkFault {
        match self {
            Self::Uart => LinkFault::MalformedPacket,
            Self::Usb => LinkFault::UsbMalformed,
            Self::I2c => LinkFault::I2cMalformed,
        }
    }
}

/// Byte-level channel to one module.
///
/// Implementations never raise on I/O trouble: `open` reports failure with
/// `false`, `write` reports how many bytes went out, and `read` returns a
/// short buffer when the deadline passes.
#[async_trait]
pub trait Transport: Send + fmt::Debug {
    /// Stable, human-readable name such as a device node path.
    fn name(&self) -> &str;

    fn medium(&self) -> Medium;

    fn is_open(&self) -> bool;

    /// Establishes the connection. Calling it on an open transport is a no-op.
    async fn open(&mut self) -> bool;

    /// Releases the connection. Safe to call repeatedly.
    async fn close(&mut self);

    /// Writes `bytes`, returning how many were accepted.
    async fn write(&mut self, bytes: &[u8]) -> usize;

    /// Reads up to `max` bytes, waiting at most `timeout`.
    async fn read(&mut self, max: usize, timeout: Duration) -> Vec<u8>;

    /// Discards any bytes already received.
    async fn flush_input(&mut self);

    /// Finds the device again after a physical reset.
    async fn rediscover(&mut self) -> bool {
        self.close().await;
        self.open().await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Medium::Uart, 0xE1, 0xE9, 0xE4)]
    #[case(Medium::Usb, 0xE6, 0xE7, 0xE8)]
    #[case(Medium::I2c, 0xD1, 0xD2, 0xD3)]
    fn each_medium_uses_its_own_code_range(
        #[case] medium: Medium,
        #[case] write: u8,
        #[case] read: u8,
        #[case] malformed: u8,
    ) {
        assert_eq!(
            (write, read, malformed),
            (
                medium.write_fault().code(),
                medium.read_fault().code(),
                medium.malformed_fault().code()
            )
        );
    }
}
