use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use nusb::Interface;
use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument};

use super::transport::{Medium, Transport};

/// Vendor ID of the Summit USB bridge.
pub const SUMMIT_USB_VENDOR_ID: u16 = 0x2495;
/// Product ID of the Summit USB bridge.
pub const SUMMIT_USB_PRODUCT_ID: u16 = 0x0016;

const CLASS_REQUEST: u8 = 0x03;
const IN_TRANSFER_LEN: u16 = 500;
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const REDISCOVER_ATTEMPTS: usize = 5;
const REDISCOVER_DELAY: Duration = Duration::from_secs(1);

/// USB transport carrying frames in class control transfers.
///
/// Each IN transfer returns up to 500 bytes; surplus bytes are buffered for
/// the next read.
pub struct UsbTransport {
    name: String,
    vendor_id: u16,
    product_id: u16,
    interface: Option<Interface>,
    inbound: VecDeque<u8>,
}

impl fmt::Debug for UsbTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbTransport")
            .field("name", &self.name)
            .field("open", &self.interface.is_some())
            .field("buffered", &self.inbound.len())
            .finish_non_exhaustive()
    }
}

impl Default for UsbTransport {
    fn default() -> Self {
        Self::new(SUMMIT_USB_VENDOR_ID, SUMMIT_USB_PRODUCT_ID)
    }
}

impl UsbTransport {
    #[must_use]
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            name: format!("usb:{vendor_id:04x}:{product_id:04x}"),
            vendor_id,
            product_id,
            interface: None,
            inbound: VecDeque::new(),
        }
    }

    fn claim(&self) -> Result<Interface, nusb::Error> {
        let device_info = nusb::list_devices()?
            .find(|device| {
                device.vendor_id() == self.vendor_id && device.product_id() == self.product_id
            })
            .ok_or_else(|| {
                nusb::Error::new(std::io::ErrorKind::NotFound, "no matching USB device")
            })?;
        debug!(
            bus = device_info.bus_number(),
            address = device_info.device_address(),
            "found USB bridge"
        );
        device_info.open()?.claim_interface(0)
    }

    async fn fill(&mut self, deadline: Duration) {
        let Some(interface) = self.interface.as_ref() else {
            return;
        };
        let transfer = interface.control_in(ControlIn {
            control_type: ControlType::Class,
            recipient: Recipient::Endpoint,
            request: CLASS_REQUEST,
            value: 0,
            index: 0,
            length: IN_TRANSFER_LEN,
        });
        match timeout(deadline, transfer).await {
            Ok(completion) => match completion.into_result() {
                Ok(data) => self.inbound.extend(data),
                Err(error) => debug!(%error, "USB control read failed"),
            },
            Err(_elapsed) => debug!("USB control read timed out"),
        }
    }
}

#[async_trait]
impl Transport for UsbTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn medium(&self) -> Medium {
        Medium::Usb
    }

    fn is_open(&self) -> bool {
        self.interface.is_some()
    }

    #[instrument(skip(self), level = "debug", fields(name = %self.name))]
    async fn open(&mut self) -> bool {
        if self.interface.is_some() {
            return true;
        }
        match self.claim() {
            Ok(interface) => {
                self.interface = Some(interface);
                true
            }
            Err(error) => {
                debug!(%error, "USB open failed");
                false
            }
        }
    }

    async fn close(&mut self) {
        self.interface = None;
        self.inbound.clear();
    }

    async fn write(&mut self, bytes: &[u8]) -> usize {
        let Some(interface) = self.interface.as_ref() else {
            return 0;
        };
        let transfer = interface.control_out(ControlOut {
            control_type: ControlType::Class,
            recipient: Recipient::Endpoint,
            request: CLASS_REQUEST,
            value: 0,
            index: 0,
            data: bytes,
        });
        match timeout(WRITE_TIMEOUT, transfer).await {
            Ok(completion) => match completion.into_result() {
                Ok(response) => response.actual_length(),
                Err(error) => {
                    debug!(%error, "USB control write failed");
                    0
                }
            },
            Err(_elapsed) => 0,
        }
    }

    async fn read(&mut self, max: usize, deadline: Duration) -> Vec<u8> {
        if self.inbound.is_empty() {
            self.fill(deadline).await;
        }
        let count = max.min(self.inbound.len());
        self.inbound.drain(..count).collect()
    }

    async fn flush_input(&mut self) {
        self.inbound.clear();
    }

    /// The bridge re-enumerates after a module reset, so the device is
    /// looked up again from scratch.
    async fn rediscover(&mut self) -> bool {
        self.close().await;
        for attempt in 1..=REDISCOVER_ATTEMPTS {
            sleep(REDISCOVER_DELAY).await;
            if self.open().await {
                info!(attempt, name = %self.name, "USB bridge rediscovered");
                return true;
            }
        }
        false
    }
}
