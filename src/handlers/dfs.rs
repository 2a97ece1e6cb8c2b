use super::descriptors::{ChannelList, DfsEngineState};
use super::dispatch::{CommandDispatcher, CommandError, Reply};
use crate::hw::Session;
use crate::protocol::CommandId;
use crate::status::Status;

/// Highest transmit power management mode.
pub const MAX_TPM_MODE: u8 = 3;

/// Handler for dynamic frequency selection on the master.
pub struct DfsHandler;

impl DfsHandler {
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn engine_state(session: &Session) -> Result<Reply<DfsEngineState>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetDfsEngineState, &[], &()).await
    }

    /// Channels the DFS engine may use without radar monitoring.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn static_channels(session: &Session) -> Result<Reply<ChannelList>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetDfsStaticChannels, &[], &()).await
    }

    /// Pins the network to `channel`, bypassing the DFS engine.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_override(session: &Session, channel: u16) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::SetDfsOverride, &[&channel], &channel).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn tpm_mode(session: &Session) -> Result<Reply<u8>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetTpmMode, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error when `mode` exceeds [`MAX_TPM_MODE`].
    pub async fn set_tpm_mode(session: &Session, mode: u8) -> Result<Status, CommandError> {
        CommandError::check_max("TPM mode", mode, MAX_TPM_MODE)?;
        CommandDispatcher::send(session, CommandId::SetTpmMode, &[&mode], &mode).await
    }
}
