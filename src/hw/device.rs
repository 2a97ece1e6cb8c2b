use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::session::Session;
use crate::handlers::{
    AudioHandler, CommandError, FirmwareVersion, MacAddress, MasterDescriptor, MasterHandler,
    ModuleDescriptor, SlaveHandler, SpeakerDescriptor,
};
use crate::status::Status;

/// Errors returned while connecting to a module.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open `{label}`")]
    Open { label: String },
    #[error("`{label}` did not return its {query}: {description} ({status})")]
    Query {
        label: String,
        query: &'static str,
        status: Status,
        description: &'static str,
    },
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl DeviceError {
    fn query(session: &Session, query: &'static str, status: Status) -> Self {
        Self::Query {
            label: session.label().to_string(),
            query,
            status,
            description: status.describe(session.class()),
        }
    }
}

/// Identity read from a slave during the prune pass.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct SlaveIdentity {
    pub module: ModuleDescriptor,
    pub speaker: SpeakerDescriptor,
}

/// One slave module with its open session.
#[derive(Debug)]
pub struct SlaveDevice {
    session: Session,
    identity: Option<SlaveIdentity>,
}

impl SlaveDevice {
    pub(crate) fn new(session: Session, identity: Option<SlaveIdentity>) -> Self {
        if let Some(identity) = identity {
            session.set_identity(identity.module.mac);
        }
        Self { session, identity }
    }

    /// Reads the module and speaker descriptors.
    ///
    /// Returns `None` unless both queries succeed.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    #[instrument(skip(session), level = "debug", fields(session = %session.label()))]
    pub async fn read_identity(session: &Session) -> Result<Option<SlaveIdentity>, CommandError> {
        let module = SlaveHandler::module_descriptor(session).await?;
        let Some(module) = module.into_value() else {
            debug!("module descriptor query failed");
            return Ok(None);
        };
        let speaker = SlaveHandler::speaker_descriptor(session).await?;
        let Some(speaker) = speaker.into_value() else {
            debug!("speaker descriptor query failed");
            return Ok(None);
        };
        Ok(Some(SlaveIdentity { module, speaker }))
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Transport name the device was found on.
    #[must_use]
    pub fn label(&self) -> &str {
        self.session.label()
    }

    #[must_use]
    pub fn identity(&self) -> Option<&SlaveIdentity> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn mac(&self) -> Option<MacAddress> {
        self.identity.map(|identity| identity.module.mac)
    }

    #[must_use]
    pub fn firmware_version(&self) -> Option<FirmwareVersion> {
        self.identity.map(|identity| identity.module.firmware_version)
    }

    pub(crate) fn into_session(self) -> Session {
        self.session
    }
}

/// The master module, identified on connect.
#[derive(Debug)]
pub struct MasterDevice {
    session: Session,
    descriptor: MasterDescriptor,
    zone: Option<u8>,
}

impl MasterDevice {
    /// Opens the session and collects the master's identity and zone.
    ///
    /// ```
    /// # async fn demo() -> Result<(), summit::DeviceError> {
    /// use summit::{DeviceClass, MacAddress, MasterDevice, Session, SimulatedDevice};
    ///
    /// let device = SimulatedDevice::master(MacAddress::new([0x02, 0xEA, 0, 0, 0, 0xF0]));
    /// let session = Session::new(DeviceClass::Master, Box::new(device.transport("sim")));
    /// let master = MasterDevice::connect(session).await?;
    /// assert_eq!(device.mac(), master.mac());
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the transport cannot be opened or the master
    /// descriptor cannot be read.
    #[instrument(skip(session), level = "info", fields(session = %session.label()))]
    pub async fn connect(session: Session) -> Result<Self, DeviceError> {
        if !session.open().await {
            return Err(DeviceError::Open {
                label: session.label().to_string(),
            });
        }
        let (status, descriptor) = MasterHandler::descriptor(&session).await?.into_parts();
        let Some(descriptor) = descriptor else {
            return Err(DeviceError::query(&session, "master descriptor", status));
        };
        session.set_identity(descriptor.module.mac);
        let zone = AudioHandler::zone(&session).await?.into_value();
        info!(
            mac = %descriptor.module.mac,
            firmware = %descriptor.module.firmware_version,
            ?zone,
            "master connected"
        );
        Ok(Self {
            session,
            descriptor,
            zone,
        })
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn descriptor(&self) -> &MasterDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn mac(&self) -> MacAddress {
        self.descriptor.module.mac
    }

    #[must_use]
    pub fn firmware_version(&self) -> FirmwareVersion {
        self.descriptor.module.firmware_version
    }

    #[must_use]
    pub fn module_id(&self) -> u16 {
        self.descriptor.module.module_id
    }

    /// Zone read on connect, if the query succeeded.
    #[must_use]
    pub fn zone(&self) -> Option<u8> {
        self.zone
    }

    pub async fn close(&self) {
        self.session.close().await;
    }
}
