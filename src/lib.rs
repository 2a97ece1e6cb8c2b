mod app;
mod cli;
mod config;
mod datalog;
mod error;
mod handlers;
mod hw;
mod mfg;
mod protocol;
mod status;
mod telemetry;
mod terminal;
mod utils;

pub use app::{ConnectedModule, Workbench, run, run_with_clients};
pub use cli::{
    Args, Command, DumpArgs, FwLoadArgs, LogLevel, MfgLoadArgs, OutputFormat, ReadArgs,
    RunOptions, StatusArgs, Target, TargetArg, WriteArgs,
};
pub use config::{
    CaptureConfig, ConfigError, DatalogConfig, ProbeConfig, SummitConfig, Topology,
    TopologyReport,
};
pub use datalog::{CommandRecord, DatalogError, DatalogSink, JsonLinesSink, MemorySink};
pub use error::{CliConfigError, SummitError};
pub use handlers::{
    AudioClockSetup, AudioHandler, ChannelList, CoefficientSet, CommandDispatcher, CommandError,
    ConfigurationStore, I2S_MAP_ENTRIES, I2sChannel, I2sInputMap, MAX_ZONE,
    DEVICE_ID_REGISTER, DescriptorError, DeviceAddress, DfsEngineState, DfsHandler, Direction,
    DiscoveryMode, EchoResult, FIRMWARE_CHUNK_LEN, FLASH_CHUNK_LEN, FirmwareHandler,
    FirmwareImage, FirmwareSource, FirmwareTarget, FirmwareUpdateError, FirmwareUpdater,
    FirmwareVersion, FlashErase, FlashHandler, FlashSection, Frame, FrameCodecError, HEADER_LEN,
    IDENTITY_MAGIC, IDENTITY_REGISTER, IMAGE_OK, InfoKind, LOCAL_DEVICE, MAX_BEACON_PERIOD,
    MAX_CHIME_VOLUME, MAX_PAYLOAD_LEN, MAX_RADIO_INDEX, MAX_SLOT, MAX_SLOT_INDEX,
    MAX_SPEAKER_INDEX, MAX_SYNC_SCAN, MAX_TPM_MODE, MAX_TRANSMIT_POWER, MacAddress,
    MasterDescriptor, MasterHandler, ModuleDescriptor, NetworkHandler, NetworkStatistics, Opcode,
    OperatingState, PayloadError, PayloadReader, PayloadWriter, RadioHandler, RegisterHandler,
    Reply, RxStatistics, SECTOR_ERASE_SETTLE, SYNC_BYTE, SessionFirmwareTarget, SlaveHandler,
    SpeakerDescriptor, TimeInfo, TraceArg, UpdateOutcome, UpdateProgress, UpdateReport,
    UpdateStage, Volume, VolumeError, WirePayload, decode_payload, encode_payload,
};
pub use hw::{
    CaptureDirection, CaptureLog, DEFAULT_BAUD_RATE, DEFAULT_PROBE_TIMEOUT, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT, DeviceDirectory, DeviceError, DeviceSelector, DeviceSelectorError,
    FAKE_MASTER_MAC, FAKE_SILENT_PORT, FakeHardwareClient, FakeJournal, FakeReply, FakeResponder,
    FakeTransport, HardwareClient, I2cTransport, MasterDevice, MasterLink, Medium, ProbeOptions,
    RealHardwareClient, RetryScope, SUMMIT_USB_PRODUCT_ID, SUMMIT_USB_VENDOR_ID,
    SerialTransport, Session, SessionSettings, SimulatedDevice, SlaveDevice, SlaveIdentity,
    TimeoutScope, Transport, UsbId, UsbTransport, enumerate_serial_ports, fake_slave_mac,
};
pub use mfg::{MAC_LINE, MfgFile, MfgFileError, dump_file_name};
pub use protocol::{
    CommandAccess, CommandFamily, CommandId, CommandMetadata, DatalogMode, DeviceClass,
    RetryPolicy,
};
pub use status::{FaultClass, LinkFault, SUCCESS_CODE, Status};
pub use terminal::TerminalClient;
