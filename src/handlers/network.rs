use std::time::Duration;

use tracing::{debug, instrument};

use super::descriptors::{
    EchoResult, InfoKind, ModuleDescriptor, NetworkStatistics, OperatingState, SpeakerDescriptor,
};
use super::dispatch::{CommandDispatcher, CommandError, Reply};
use super::payload::WirePayload;
use crate::hw::Session;
use crate::protocol::CommandId;
use crate::status::Status;

/// Longest beacon period the master accepts.
pub const MAX_BEACON_PERIOD: Duration = Duration::from_millis(10_000);
/// Highest speaker index a master tracks.
pub const MAX_SPEAKER_INDEX: u8 = 31;
/// Highest TDMA slot a speaker can be assigned.
pub const MAX_SLOT: u8 = 31;

/// How the master searches for speakers.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, strum_macros::Display)]
pub enum DiscoveryMode {
    /// Only speakers the master has seen before.
    #[default]
    #[strum(to_string = "known")]
    Known,
    /// Any speaker in pairing mode.
    #[strum(to_string = "open")]
    Open,
}

impl DiscoveryMode {
    const fn code(self) -> u8 {
        match self {
            Self::Known => 0,
            Self::Open => 1,
        }
    }
}

/// Handler for master commands that act on the wireless network.
pub struct NetworkHandler;

impl NetworkHandler {
    /// Starts or stops beaconing. `period` applies only when enabling.
    ///
    /// ```
    /// # async fn demo(session: summit::Session) -> Result<(), summit::CommandError> {
    /// use std::time::Duration;
    ///
    /// use summit::NetworkHandler;
    ///
    /// let status = NetworkHandler::beacon(&session, Some(Duration::from_millis(4500))).await?;
    /// println!("{status}");
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when `period` exceeds [`MAX_BEACON_PERIOD`].
    pub async fn beacon(session: &Session, period: Option<Duration>) -> Result<Status, CommandError> {
        let millis = match period {
            Some(period) => {
                let millis = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
                CommandError::check_max(
                    "beacon period (ms)",
                    millis,
                    u64::try_from(MAX_BEACON_PERIOD.as_millis()).unwrap_or(u64::MAX),
                )?;
                u16::try_from(millis).unwrap_or(u16::MAX)
            }
            None => 0,
        };
        let enable = period.is_some();
        CommandDispatcher::send(
            session,
            CommandId::Beacon,
            &[&enable, &millis],
            &(enable, millis),
        )
        .await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn discover(session: &Session, mode: DiscoveryMode) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::Discover, &[&mode], &mode.code()).await
    }

    /// # Errors
    ///
    /// Returns an error when `speaker` or `slot` is out of range.
    pub async fn assign_slot(session: &Session, speaker: u8, slot: u8) -> Result<Status, CommandError> {
        CommandError::check_max("speaker index", speaker, MAX_SPEAKER_INDEX)?;
        CommandError::check_max("slot", slot, MAX_SLOT)?;
        CommandDispatcher::send(
            session,
            CommandId::AssignSlot,
            &[&speaker, &slot],
            &(speaker, slot),
        )
        .await
    }

    /// Resets one speaker over the air.
    ///
    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    pub async fn reset_speaker(session: &Session, speaker: u8) -> Result<Status, CommandError> {
        CommandError::check_max("speaker index", speaker, MAX_SPEAKER_INDEX)?;
        CommandDispatcher::send(session, CommandId::ResetSpeaker, &[&speaker], &speaker).await
    }

    async fn speaker_info<T>(
        session: &Session,
        speaker: u8,
        kind: InfoKind,
    ) -> Result<Reply<T>, CommandError>
    where
        T: WirePayload + Send,
    {
        CommandError::check_max("speaker index", speaker, MAX_SPEAKER_INDEX)?;
        CommandDispatcher::call(
            session,
            CommandId::GetSpeakerInfo,
            &[&speaker, &kind],
            &(speaker, kind),
        )
        .await
    }

    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    pub async fn speaker_operating_state(
        session: &Session,
        speaker: u8,
    ) -> Result<Reply<OperatingState>, CommandError> {
        Self::speaker_info(session, speaker, InfoKind::OperatingState).await
    }

    /// Module descriptor of a networked speaker, as cached by the master.
    ///
    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    pub async fn speaker_module(
        session: &Session,
        speaker: u8,
    ) -> Result<Reply<ModuleDescriptor>, CommandError> {
        Self::speaker_info(session, speaker, InfoKind::ModuleDescriptor).await
    }

    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    pub async fn speaker_descriptor(
        session: &Session,
        speaker: u8,
    ) -> Result<Reply<SpeakerDescriptor>, CommandError> {
        Self::speaker_info(session, speaker, InfoKind::SpeakerDescriptor).await
    }

    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    pub async fn speaker_statistics(
        session: &Session,
        speaker: u8,
    ) -> Result<Reply<NetworkStatistics>, CommandError> {
        Self::speaker_info(session, speaker, InfoKind::NetworkStatistics).await
    }

    /// Raw WISA descriptor record the master holds for one speaker.
    ///
    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    pub async fn speaker_wisa_descriptor(
        session: &Session,
        speaker: u8,
    ) -> Result<Reply<Vec<u8>>, CommandError> {
        Self::speaker_info(session, speaker, InfoKind::WisaDescriptor).await
    }

    /// Raw key status record of one speaker.
    ///
    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    pub async fn speaker_key_status(
        session: &Session,
        speaker: u8,
    ) -> Result<Reply<Vec<u8>>, CommandError> {
        Self::speaker_info(session, speaker, InfoKind::KeyStatus).await
    }

    /// Pings one speaker through the network. Made once, never retried.
    ///
    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    #[instrument(skip(session), level = "debug", fields(session = %session.label()))]
    pub async fn echo(session: &Session, speaker: u8) -> Result<Reply<EchoResult>, CommandError> {
        CommandError::check_max("speaker index", speaker, MAX_SPEAKER_INDEX)?;
        let reply = CommandDispatcher::call(session, CommandId::Echo, &[&speaker], &speaker).await?;
        debug!(status = %reply.status(), "echo finished");
        Ok(reply)
    }

    /// Selects the coefficient table a speaker plays with.
    ///
    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    pub async fn select_coefficient_table(
        session: &Session,
        speaker: u8,
        table: u8,
    ) -> Result<Status, CommandError> {
        CommandError::check_max("speaker index", speaker, MAX_SPEAKER_INDEX)?;
        CommandDispatcher::send(
            session,
            CommandId::SelectCoefficientTable,
            &[&speaker, &table],
            &(speaker, table),
        )
        .await
    }

    /// Sets a speaker's audio delay in microseconds.
    ///
    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    pub async fn set_delay(session: &Session, speaker: u8, delay: u16) -> Result<Status, CommandError> {
        CommandError::check_max("speaker index", speaker, MAX_SPEAKER_INDEX)?;
        CommandDispatcher::send(
            session,
            CommandId::SetAudioDelay,
            &[&speaker, &delay],
            &(speaker, delay),
        )
        .await
    }

    /// Starts audio streaming.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn start(session: &Session) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::Start, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn stop(session: &Session) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::Stop, &[], &()).await
    }

    /// Plays a tone on one speaker for `duration`.
    ///
    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range or `duration` does
    /// not fit in 16-bit milliseconds.
    pub async fn chime(
        session: &Session,
        speaker: u8,
        tone: u8,
        duration: Duration,
    ) -> Result<Status, CommandError> {
        CommandError::check_max("speaker index", speaker, MAX_SPEAKER_INDEX)?;
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        CommandError::check_max("chime duration (ms)", millis, u16::MAX)?;
        let millis = u16::try_from(millis).unwrap_or(u16::MAX);
        CommandDispatcher::send(
            session,
            CommandId::Chime,
            &[&speaker, &tone, &millis],
            &(speaker, tone, millis),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::handlers::{FirmwareVersion, Frame, MacAddress};
    use crate::hw::{FakeReply, FakeTransport, SimulatedDevice};
    use crate::protocol::DeviceClass;
    use crate::status::SUCCESS_CODE;

    fn speaker(last: u8) -> (ModuleDescriptor, SpeakerDescriptor) {
        (
            ModuleDescriptor {
                module_id: 0x0200 | u16::from(last),
                hardware_type: 0x02,
                hardware_revision: 0x01,
                firmware_version: FirmwareVersion::from_raw(0x0051),
                mac: MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x01, last]),
            },
            SpeakerDescriptor {
                speaker_type: 0x02,
                slot_index: last,
                zone: 0,
                channel_map: 0x01,
            },
        )
    }

    async fn master_with_speakers(count: u8) -> (SimulatedDevice, Session) {
        let mut device = SimulatedDevice::master(MacAddress::new([0x02, 0xEA, 0, 0, 0, 0x01]));
        for last in 0..count {
            let (module, descriptor) = speaker(last);
            device = device.with_network_speaker(module, descriptor);
        }
        let session = Session::new(DeviceClass::Master, Box::new(device.transport("sim")));
        assert!(session.open().await);
        (device, session)
    }

    #[tokio::test]
    async fn speaker_records_come_back_raw() {
        let (_device, session) = master_with_speakers(2).await;

        let wisa = NetworkHandler::speaker_wisa_descriptor(&session, 1)
            .await
            .expect("wisa query should validate")
            .into_value()
            .expect("wisa record should be returned");
        assert!(wisa.ends_with(&speaker(1).0.mac.octets()));

        assert_eq!(
            Some(vec![0x01]),
            NetworkHandler::speaker_key_status(&session, 0)
                .await
                .expect("key status query should validate")
                .into_value()
        );
    }

    #[tokio::test]
    async fn beacon_period_above_limit_is_rejected_locally() {
        let transport = FakeTransport::silent("sim");
        let journal = transport.journal();
        let session = Session::new(DeviceClass::Master, Box::new(transport));
        assert!(session.open().await);

        assert_matches!(
            NetworkHandler::beacon(&session, Some(Duration::from_millis(10_001))).await,
            Err(CommandError::OutOfRange {
                value: 10_001,
                max: 10_000,
                ..
            })
        );
        assert_eq!(0, journal.frame_count());
    }

    #[tokio::test]
    async fn beacon_encodes_enable_and_period() {
        let transport = FakeTransport::new("sim", |request: &Frame| {
            assert_eq!(&[0x01, 0x94, 0x11], request.payload());
            FakeReply::Frame(Frame::response_to(request, SUCCESS_CODE, Vec::new()))
        });
        let session = Session::new(DeviceClass::Master, Box::new(transport));
        assert!(session.open().await);

        let status = NetworkHandler::beacon(&session, Some(Duration::from_millis(4500)))
            .await
            .expect("beacon should validate");
        assert_eq!(Status::Success, status);
    }

    #[tokio::test]
    async fn speaker_info_is_read_by_index() {
        let (_device, session) = master_with_speakers(2).await;

        let module = NetworkHandler::speaker_module(&session, 1)
            .await
            .expect("speaker query should validate")
            .into_value()
            .expect("module should be returned");

        assert_eq!(speaker(1).0, module);
    }

    #[tokio::test]
    async fn missing_speaker_reports_device_status() {
        let (_device, session) = master_with_speakers(1).await;
        session.set_retries(0);

        let reply = NetworkHandler::speaker_descriptor(&session, 4)
            .await
            .expect("speaker query should validate");

        assert_eq!(0x10, reply.status().code());
        assert_eq!(None, reply.value());
    }

    #[tokio::test]
    async fn failed_echo_is_not_repeated() {
        let (device, session) = master_with_speakers(1).await;

        let reply = NetworkHandler::echo(&session, 3)
            .await
            .expect("echo should validate");

        assert!(!reply.is_success());
        assert_eq!(0, device.echo_count());

        let reply = NetworkHandler::echo(&session, 0)
            .await
            .expect("echo should validate");
        assert_eq!(
            Some(&EchoResult {
                tx_antenna: 1,
                rx_antenna: 2
            }),
            reply.value()
        );
        assert_eq!(1, device.echo_count());
    }

    #[tokio::test]
    async fn chime_duration_must_fit_sixteen_bits() {
        let (_device, session) = master_with_speakers(1).await;
        assert_matches!(
            NetworkHandler::chime(&session, 0, 3, Duration::from_secs(70)).await,
            Err(CommandError::OutOfRange { .. })
        );
        assert_eq!(
            Ok(Status::Success),
            NetworkHandler::chime(&session, 0, 3, Duration::from_millis(500)).await
        );
    }
}
