mod capture;
mod device;
mod directory;
mod fake_backend;
mod hardware;
mod i2c_backend;
mod serial_backend;
mod session;
mod transport;
mod usb_backend;

pub use self::capture::{CaptureDirection, CaptureLog};
pub use self::device::{DeviceError, MasterDevice, SlaveDevice, SlaveIdentity};
pub use self::directory::{
    DEFAULT_PROBE_TIMEOUT, DeviceDirectory, DeviceSelector, DeviceSelectorError, ProbeOptions,
};
pub use self::fake_backend::{FakeJournal, FakeReply, FakeResponder, FakeTransport, SimulatedDevice};
pub use self::hardware::{
    FAKE_MASTER_MAC, FAKE_SILENT_PORT, FakeHardwareClient, HardwareClient, MasterLink,
    RealHardwareClient, UsbId, fake_slave_mac,
};
pub use self::i2c_backend::I2cTransport;
pub use self::serial_backend::{DEFAULT_BAUD_RATE, SerialTransport, enumerate_serial_ports};
pub use self::session::{
    DEFAULT_RETRIES, DEFAULT_TIMEOUT, RetryScope, Session, SessionSettings, TimeoutScope,
};
pub use self::transport::{Medium, Transport};
pub use self::usb_backend::{SUMMIT_USB_PRODUCT_ID, SUMMIT_USB_VENDOR_ID, UsbTransport};
