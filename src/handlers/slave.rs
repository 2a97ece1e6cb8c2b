use super::descriptors::{
    CoefficientSet, FirmwareVersion, InfoKind, ModuleDescriptor, NetworkStatistics,
    OperatingState, SpeakerDescriptor,
};
use super::dispatch::{CommandDispatcher, CommandError, Reply};
use super::payload::WirePayload;
use crate::hw::Session;
use crate::protocol::CommandId;
use crate::status::Status;

/// Loudest tone volume a slave accepts for a local chime.
pub const MAX_CHIME_VOLUME: u8 = 100;

/// Handler for commands answered by a slave about itself.
pub struct SlaveHandler;

impl SlaveHandler {
    async fn local_info<T>(session: &Session, kind: InfoKind) -> Result<Reply<T>, CommandError>
    where
        T: WirePayload + Send,
    {
        CommandDispatcher::call(session, CommandId::GetLocalInfo, &[&kind], &kind).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn operating_state(session: &Session) -> Result<Reply<OperatingState>, CommandError> {
        Self::local_info(session, InfoKind::OperatingState).await
    }

    /// Reads the slave's own module descriptor.
    ///
    /// ```
    /// # async fn demo(session: summit::Session) -> Result<(), summit::CommandError> {
    /// use summit::SlaveHandler;
    ///
    /// let reply = SlaveHandler::module_descriptor(&session).await?;
    /// if let Some(module) = reply.value() {
    ///     println!("{} at firmware {}", module.mac, module.firmware_version);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn module_descriptor(
        session: &Session,
    ) -> Result<Reply<ModuleDescriptor>, CommandError> {
        Self::local_info(session, InfoKind::ModuleDescriptor).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn speaker_descriptor(
        session: &Session,
    ) -> Result<Reply<SpeakerDescriptor>, CommandError> {
        Self::local_info(session, InfoKind::SpeakerDescriptor).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn network_statistics(
        session: &Session,
    ) -> Result<Reply<NetworkStatistics>, CommandError> {
        Self::local_info(session, InfoKind::NetworkStatistics).await
    }

    async fn record(
        session: &Session,
        kind: InfoKind,
        index: u8,
    ) -> Result<Reply<Vec<u8>>, CommandError> {
        CommandDispatcher::call(
            session,
            CommandId::GetLocalInfo,
            &[&kind, &index],
            &(kind, index),
        )
        .await
    }

    async fn set_record(
        session: &Session,
        kind: InfoKind,
        index: u8,
        record: &[u8],
    ) -> Result<Status, CommandError> {
        CommandDispatcher::send(
            session,
            CommandId::SetLocalInfo,
            &[&kind, &index, &record.len()],
            &(kind, index, record.to_vec()),
        )
        .await
    }

    /// Raw WISA descriptor record.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn wisa_descriptor(session: &Session) -> Result<Reply<Vec<u8>>, CommandError> {
        Self::record(session, InfoKind::WisaDescriptor, 0).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn set_wisa_descriptor(
        session: &Session,
        record: &[u8],
    ) -> Result<Status, CommandError> {
        Self::set_record(session, InfoKind::WisaDescriptor, 0, record).await
    }

    /// Raw descriptor of one amplifier channel.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn amplifier_descriptor(
        session: &Session,
        index: u8,
    ) -> Result<Reply<Vec<u8>>, CommandError> {
        Self::record(session, InfoKind::AmplifierDescriptor, index).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn set_amplifier_descriptor(
        session: &Session,
        index: u8,
        record: &[u8],
    ) -> Result<Status, CommandError> {
        Self::set_record(session, InfoKind::AmplifierDescriptor, index, record).await
    }

    /// Raw coefficient table information.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn coefficient_info(
        session: &Session,
        set: CoefficientSet,
    ) -> Result<Reply<Vec<u8>>, CommandError> {
        Self::record(session, InfoKind::CoefficientInfo, set.index()).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn set_coefficient_info(
        session: &Session,
        set: CoefficientSet,
        record: &[u8],
    ) -> Result<Status, CommandError> {
        Self::set_record(session, InfoKind::CoefficientInfo, set.index(), record).await
    }

    /// Firmware version from the module descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn firmware_version(session: &Session) -> Result<Reply<FirmwareVersion>, CommandError> {
        Ok(Self::module_descriptor(session)
            .await?
            .map(|module| module.firmware_version))
    }

    /// Commits manufacturing data held in RAM to flash.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a slave.
    pub async fn save_mfg_data(session: &Session) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::SaveSlaveMfgData, &[], &()).await
    }

    /// Plays a tone on the attached speaker.
    ///
    /// # Errors
    ///
    /// Returns an error when `volume` exceeds [`MAX_CHIME_VOLUME`].
    pub async fn chime(session: &Session, tone: u8, volume: u8) -> Result<Status, CommandError> {
        CommandError::check_max("chime volume", volume, MAX_CHIME_VOLUME)?;
        CommandDispatcher::send(
            session,
            CommandId::SlaveChime,
            &[&tone, &volume],
            &(tone, volume),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::handlers::MacAddress;
    use crate::hw::SimulatedDevice;
    use crate::protocol::DeviceClass;

    const MAC: MacAddress = MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, 0x05]);

    async fn slave_session() -> Session {
        let device = SimulatedDevice::slave(MAC);
        let session = Session::new(DeviceClass::Slave, Box::new(device.transport("sim")));
        assert!(session.open().await);
        session
    }

    #[tokio::test]
    async fn module_descriptor_identifies_the_slave() {
        let session = slave_session().await;

        let module = SlaveHandler::module_descriptor(&session)
            .await
            .expect("descriptor query should validate")
            .into_value()
            .expect("descriptor should be returned");

        assert_eq!(MAC, module.mac);
        assert_eq!(
            Some(module.firmware_version),
            SlaveHandler::firmware_version(&session)
                .await
                .expect("version query should validate")
                .into_value()
        );
    }

    #[tokio::test]
    async fn local_statistics_are_decoded() {
        let session = slave_session().await;
        let stats = SlaveHandler::network_statistics(&session)
            .await
            .expect("stats query should validate")
            .into_value()
            .expect("stats should be returned");
        assert_eq!([1, 0, 0, 2], stats.packet_receive_errors);
    }

    #[tokio::test]
    async fn amplifier_records_are_kept_per_channel() {
        let session = slave_session().await;

        assert_eq!(
            Ok(Status::Success),
            SlaveHandler::set_amplifier_descriptor(&session, 1, &[0x11, 0x22]).await
        );

        assert_eq!(
            Some(vec![0x11, 0x22]),
            SlaveHandler::amplifier_descriptor(&session, 1)
                .await
                .expect("amplifier query should validate")
                .into_value()
        );
        assert_ne!(
            Some(vec![0x11, 0x22]),
            SlaveHandler::amplifier_descriptor(&session, 0)
                .await
                .expect("amplifier query should validate")
                .into_value()
        );
    }

    #[tokio::test]
    async fn missing_record_is_a_device_status() {
        let session = slave_session().await;

        let reply = SlaveHandler::amplifier_descriptor(&session, 9)
            .await
            .expect("amplifier query should validate");

        assert_eq!(Status::Device(0x03), reply.status());
    }

    #[tokio::test]
    async fn coefficient_sets_are_selected_by_index() {
        let session = slave_session().await;

        SlaveHandler::set_coefficient_info(&session, CoefficientSet::Current, &[0x07])
            .await
            .expect("coefficient update should validate");

        assert_eq!(
            Some(vec![0x07]),
            SlaveHandler::coefficient_info(&session, CoefficientSet::Current)
                .await
                .expect("coefficient query should validate")
                .into_value()
        );
        assert!(
            SlaveHandler::coefficient_info(&session, CoefficientSet::Global)
                .await
                .expect("coefficient query should validate")
                .is_success()
        );
        assert!(
            SlaveHandler::wisa_descriptor(&session)
                .await
                .expect("wisa query should validate")
                .is_success()
        );
    }

    #[tokio::test]
    async fn slave_commands_are_refused_for_masters() {
        let device = SimulatedDevice::master(MAC);
        let session = Session::new(DeviceClass::Master, Box::new(device.transport("sim")));
        assert!(session.open().await);

        assert_matches!(
            SlaveHandler::save_mfg_data(&session).await,
            Err(CommandError::WrongDeviceClass { .. })
        );
    }

    #[tokio::test]
    async fn chime_volume_is_checked() {
        let session = slave_session().await;
        assert_matches!(
            SlaveHandler::chime(&session, 1, 120).await,
            Err(CommandError::OutOfRange { .. })
        );
        assert_eq!(Ok(Status::Success), SlaveHandler::chime(&session, 1, 60).await);
    }
}
