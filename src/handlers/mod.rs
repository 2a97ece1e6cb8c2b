mod audio;
mod descriptors;
mod dfs;
mod dispatch;
mod firmware;
mod firmware_update;
mod flash;
mod frame_codec;
mod master;
mod network;
mod payload;
mod radio;
mod register;
mod slave;

pub use self::audio::{
    AudioClockSetup, AudioHandler, I2S_MAP_ENTRIES, I2sChannel, I2sInputMap, MAX_ZONE, Volume,
    VolumeError,
};
pub use self::descriptors::{
    ChannelList, CoefficientSet, DescriptorError, DfsEngineState, EchoResult, FirmwareVersion,
    InfoKind, MacAddress, MasterDescriptor, ModuleDescriptor, NetworkStatistics, OperatingState,
    RxStatistics, SpeakerDescriptor, TimeInfo,
};
pub use self::dfs::{DfsHandler, MAX_TPM_MODE};
pub use self::dispatch::{CommandDispatcher, CommandError, Reply, TraceArg};
pub use self::firmware::{
    DeviceAddress, FirmwareHandler, IMAGE_OK, LOCAL_DEVICE, MAX_SLOT_INDEX,
};
pub use self::firmware_update::{
    FIRMWARE_CHUNK_LEN, FirmwareImage, FirmwareSource, FirmwareTarget, FirmwareUpdateError,
    FirmwareUpdater, SessionFirmwareTarget, UpdateOutcome, UpdateProgress, UpdateReport,
    UpdateStage,
};
pub use self::flash::{
    FLASH_CHUNK_LEN, FlashErase, FlashHandler, FlashSection, SECTOR_ERASE_SETTLE,
};
pub use self::frame_codec::{
    Direction, Frame, FrameCodecError, HEADER_LEN, MAX_PAYLOAD_LEN, MAX_SYNC_SCAN, Opcode,
    SYNC_BYTE,
};
pub(crate) use self::frame_codec::read_frame;
pub use self::master::{ConfigurationStore, MasterHandler};
pub use self::network::{
    DiscoveryMode, MAX_BEACON_PERIOD, MAX_SLOT, MAX_SPEAKER_INDEX, NetworkHandler,
};
pub use self::payload::{
    PayloadError, PayloadReader, PayloadWriter, WirePayload, decode_payload, encode_payload,
};
pub use self::radio::{MAX_RADIO_INDEX, MAX_TRANSMIT_POWER, RadioHandler};
pub use self::register::{
    DEVICE_ID_REGISTER, IDENTITY_MAGIC, IDENTITY_REGISTER, RegisterHandler,
};
pub use self::slave::{MAX_CHIME_VOLUME, SlaveHandler};
