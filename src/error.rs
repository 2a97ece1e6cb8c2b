use std::path::PathBuf;

use derive_more::From;
use thiserror::Error;

use crate::config::ConfigError;
use crate::datalog::DatalogError;
use crate::handlers::{
    CommandError, DescriptorError, FirmwareUpdateError, FrameCodecError, PayloadError,
    VolumeError,
};
use crate::hw::{DeviceError, DeviceSelectorError};
use crate::mfg::MfgFileError;

/// Errors returned when validating command-line options.
#[derive(Debug, Error)]
pub enum CliConfigError {
    #[error("`{value}` is not a USB id; expected `VID:PID` in hex")]
    InvalidUsbId { value: String },
    #[error("no master is configured; pass --master-uart, --master-usb or --fake")]
    NoMaster,
    #[error("no slave matches `{selector}`")]
    NoSuchDevice { selector: String },
    #[error("`{label}` has not been identified, so its MAC is unknown")]
    UnknownIdentity { label: String },
    #[error("`{path}` exists; pass --overwrite to replace it")]
    FileExists { path: PathBuf },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Umbrella over every error the library can return.
#[derive(Debug, Error, From)]
pub enum SummitError {
    #[error(transparent)]
    #[from(FrameCodecError, Box<FrameCodecError>)]
    FrameCodec(Box<FrameCodecError>),
    #[error(transparent)]
    #[from(PayloadError, Box<PayloadError>)]
    Payload(Box<PayloadError>),
    #[error(transparent)]
    #[from(DescriptorError, Box<DescriptorError>)]
    Descriptor(Box<DescriptorError>),
    #[error(transparent)]
    #[from(CommandError, Box<CommandError>)]
    Command(Box<CommandError>),
    #[error(transparent)]
    #[from(VolumeError, Box<VolumeError>)]
    Volume(Box<VolumeError>),
    #[error(transparent)]
    #[from(FirmwareUpdateError, Box<FirmwareUpdateError>)]
    FirmwareUpdate(Box<FirmwareUpdateError>),
    #[error(transparent)]
    #[from(MfgFileError, Box<MfgFileError>)]
    MfgFile(Box<MfgFileError>),
    #[error(transparent)]
    #[from(DeviceError, Box<DeviceError>)]
    Device(Box<DeviceError>),
    #[error(transparent)]
    #[from(DeviceSelectorError, Box<DeviceSelectorError>)]
    DeviceSelector(Box<DeviceSelectorError>),
    #[error(transparent)]
    #[from(DatalogError, Box<DatalogError>)]
    Datalog(Box<DatalogError>),
    #[error(transparent)]
    #[from(ConfigError, Box<ConfigError>)]
    Config(Box<ConfigError>),
    #[error(transparent)]
    #[from(CliConfigError, Box<CliConfigError>)]
    CliConfig(Box<CliConfigError>),
}
