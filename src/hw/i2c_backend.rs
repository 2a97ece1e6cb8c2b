use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use embedded_hal::i2c::{I2c, SevenBitAddress};
use tracing::{debug, info};

use super::transport::{Medium, Transport};

/// Lowest and highest non-reserved 7-bit addresses probed on rediscovery.
const FIRST_ADDRESS: SevenBitAddress = 0x08;
const LAST_ADDRESS: SevenBitAddress = 0x77;

/// I2C transport over any `embedded-hal` bus.
///
/// The module answers reads with whatever it has queued; the framer pulls
/// bytes until a complete frame is assembled.
pub struct I2cTransport<B> {
    name: String,
    bus: B,
    address: SevenBitAddress,
    open: bool,
    inbound: VecDeque<u8>,
}

impl<B> fmt::Debug for I2cTransport<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I2cTransport")
            .field("name", &self.name)
            .field("address", &format_args!("0x{:02X}", self.address))
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl<B: I2c> I2cTransport<B> {
    pub fn new(name: impl Into<String>, bus: B, address: SevenBitAddress) -> Self {
        Self {
            name: name.into(),
            bus,
            address,
            open: false,
            inbound: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn address(&self) -> SevenBitAddress {
        self.address
    }

    fn acknowledges(&mut self, address: SevenBitAddress) -> bool {
        self.bus.write(address, &[]).is_ok()
    }
}

#[async_trait]
impl<B> Transport for I2cTransport<B>
where
    B: I2c + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn medium(&self) -> Medium {
        Medium::I2c
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> bool {
        if !self.open {
            self.open = self.acknowledges(self.address);
            if !self.open {
                debug!(address = self.address, "I2C module did not acknowledge");
            }
        }
        self.open
    }

    async fn close(&mut self) {
        self.open = false;
        self.inbound.clear();
    }

    async fn write(&mut self, bytes: &[u8]) -> usize {
        if !self.open {
            return 0;
        }
        match self.bus.write(self.address, bytes) {
            Ok(()) => bytes.len(),
            Err(error) => {
                debug!(?error, "I2C write failed");
                0
            }
        }
    }

    async fn read(&mut self, max: usize, _timeout: Duration) -> Vec<u8> {
        if !self.open || max == 0 {
            return Vec::new();
        }
        if self.inbound.is_empty() {
            let mut buffer = vec![0u8; max];
            match self.bus.read(self.address, &mut buffer) {
                Ok(()) => self.inbound.extend(buffer),
                Err(error) => debug!(?error, "I2C read failed"),
            }
        }
        let count = max.min(self.inbound.len());
        self.inbound.drain(..count).collect()
    }

    async fn flush_input(&mut self) {
        self.inbound.clear();
    }

    /// Scans the bus for the module, which may come back at a new address
    /// after a reset.
    async fn rediscover(&mut self) -> bool {
        self.close().await;
        if self.acknowledges(self.address) {
            self.open = true;
            return true;
        }
        let found = (FIRST_ADDRESS..=LAST_ADDRESS).find(|address| self.acknowledges(*address));
        if let Some(address) = found {
            info!(
                previous = self.address,
                address, "I2C module answered at a new address"
            );
            self.address = address;
            self.open = true;
        }
        self.open
    }
}
