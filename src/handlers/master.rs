use tracing::{info, instrument};

use super::descriptors::{
    InfoKind, MasterDescriptor, NetworkStatistics, OperatingState, SpeakerDescriptor,
};
use super::dispatch::{CommandDispatcher, CommandError, Reply};
use super::payload::WirePayload;
use crate::hw::Session;
use crate::protocol::CommandId;
use crate::status::Status;

/// Configuration store selected by [`MasterHandler::save_configuration`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, strum_macros::Display)]
pub enum ConfigurationStore {
    /// Network and speaker configuration.
    #[default]
    #[strum(to_string = "network")]
    Network,
    /// Audio settings such as volume and zones.
    #[strum(to_string = "audio")]
    Audio,
}

impl ConfigurationStore {
    const fn code(self) -> u8 {
        match self {
            Self::Network => 0,
            Self::Audio => 1,
        }
    }
}

/// Handler for master status and housekeeping commands.
pub struct MasterHandler;

impl MasterHandler {
    async fn info<T>(session: &Session, kind: InfoKind) -> Result<Reply<T>, CommandError>
    where
        T: WirePayload + Send,
    {
        CommandDispatcher::call(session, CommandId::GetMasterInfo, &[&kind], &kind).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn operating_state(session: &Session) -> Result<Reply<OperatingState>, CommandError> {
        Self::info(session, InfoKind::OperatingState).await
    }

    /// Reads the master's identity, capacity and network ID.
    ///
    /// ```
    /// # async fn demo(session: summit::Session) -> Result<(), summit::CommandError> {
    /// use summit::MasterHandler;
    ///
    /// if let Some(descriptor) = MasterHandler::descriptor(&session).await?.into_value() {
    ///     println!("{} runs {}", descriptor.module.mac, descriptor.module.firmware_version);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn descriptor(session: &Session) -> Result<Reply<MasterDescriptor>, CommandError> {
        Self::info(session, InfoKind::ModuleDescriptor).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn speaker_descriptor(
        session: &Session,
    ) -> Result<Reply<SpeakerDescriptor>, CommandError> {
        Self::info(session, InfoKind::SpeakerDescriptor).await
    }

    /// Network counters kept by the master.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn network_statistics(
        session: &Session,
    ) -> Result<Reply<NetworkStatistics>, CommandError> {
        Self::info(session, InfoKind::NetworkStatistics).await
    }

    async fn record(session: &Session, kind: InfoKind) -> Result<Reply<Vec<u8>>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetMasterInfo, &[&kind], &(kind, 0u8)).await
    }

    /// Raw WISA descriptor record kept by the master.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn wisa_descriptor(session: &Session) -> Result<Reply<Vec<u8>>, CommandError> {
        Self::record(session, InfoKind::WisaDescriptor).await
    }

    /// Raw key status record.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn key_status(session: &Session) -> Result<Reply<Vec<u8>>, CommandError> {
        Self::record(session, InfoKind::KeyStatus).await
    }

    /// Replaces the master's WISA descriptor record.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_wisa_descriptor(
        session: &Session,
        record: &[u8],
    ) -> Result<Status, CommandError> {
        let kind = InfoKind::WisaDescriptor;
        CommandDispatcher::send(
            session,
            CommandId::SetMasterInfo,
            &[&kind, &record.len()],
            &(kind, 0u8, record.to_vec()),
        )
        .await
    }

    /// Whether the master forwards block events to the host.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn block_events_enabled(session: &Session) -> Result<Reply<bool>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetBlockEvents, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_block_events(session: &Session, enable: bool) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::SetBlockEvents, &[&enable], &enable).await
    }

    /// Number of speakers associated with the master.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn speaker_count(session: &Session) -> Result<Reply<u8>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetSpeakerCount, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn map_type(session: &Session) -> Result<Reply<u8>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetMapType, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_map_type(session: &Session, map_type: u8) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::SetMapType, &[&map_type], &map_type).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn autostart(session: &Session) -> Result<Reply<bool>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetAutostart, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_autostart(session: &Session, enable: bool) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::SetAutostart, &[&enable], &enable).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn led_disabled(session: &Session) -> Result<Reply<bool>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetLedDisable, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_led_disabled(session: &Session, disable: bool) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::SetLedDisable, &[&disable], &disable).await
    }

    /// Commits the current configuration to non-volatile storage.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn save_configuration(
        session: &Session,
        store: ConfigurationStore,
    ) -> Result<Status, CommandError> {
        CommandDispatcher::send(
            session,
            CommandId::SaveConfiguration,
            &[&store],
            &store.code(),
        )
        .await
    }

    /// Commits the master's manufacturing data held in RAM.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn save_mfg_data(session: &Session) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::SaveMasterMfgData, &[], &()).await
    }

    /// Tears down the wireless network.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    #[instrument(skip(session), level = "info", fields(session = %session.label()))]
    pub async fn shutdown(session: &Session) -> Result<Status, CommandError> {
        let status = CommandDispatcher::send(session, CommandId::Shutdown, &[], &()).await?;
        info!(%status, "network shutdown requested");
        Ok(status)
    }

    /// Restores the network from saved configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    #[instrument(skip(session), level = "info", fields(session = %session.label()))]
    pub async fn restore(session: &Session) -> Result<Status, CommandError> {
        let status = CommandDispatcher::send(session, CommandId::Restore, &[], &()).await?;
        info!(%status, "network restore requested");
        Ok(status)
    }
}
