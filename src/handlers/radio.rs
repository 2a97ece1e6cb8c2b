use super::descriptors::{MacAddress, RxStatistics, TimeInfo};
use super::dispatch::{CommandDispatcher, CommandError, Reply};
use super::register::RegisterHandler;
use crate::hw::Session;
use crate::protocol::CommandId;
use crate::status::Status;

/// Highest transmit power step accepted by the radio.
pub const MAX_TRANSMIT_POWER: u8 = 31;
/// Highest radio index on a module.
pub const MAX_RADIO_INDEX: u8 = 1;

const ANTENNA_REGISTER: u32 = 0x0040_1018;
const TX_ANTENNA_SHIFT: u16 = 6;
const RX_ANTENNA_SHIFT: u16 = 4;
const ANTENNA_MASK: u16 = 0x03;
/// Source MAC registers, two octets each with the earlier octet in the low byte.
const SOURCE_MAC_REGISTERS: [u32; 3] = [0x0040_3018, 0x0040_301C, 0x0040_3020];

/// Handler for radio diagnostics shared by masters and slaves.
pub struct RadioHandler;

impl RadioHandler {
    /// Reads the current radio channel.
    ///
    /// ```
    /// # async fn demo(session: summit::Session) -> Result<(), summit::CommandError> {
    /// use summit::RadioHandler;
    ///
    /// if let Some(channel) = RadioHandler::channel(&session).await?.into_value() {
    ///     println!("channel {channel}");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn channel(session: &Session) -> Result<Reply<u16>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetRadioChannel, &[], &()).await
    }

    /// Moves one radio to `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error when `radio` is not a valid radio index.
    pub async fn set_channel(
        session: &Session,
        radio: u8,
        channel: u16,
    ) -> Result<Status, CommandError> {
        CommandError::check_max("radio", radio, MAX_RADIO_INDEX)?;
        CommandDispatcher::send(
            session,
            CommandId::SetRadioChannel,
            &[&radio, &channel],
            &(radio, channel),
        )
        .await
    }

    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn transmit_power(session: &Session) -> Result<Reply<u8>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetTransmitPower, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error when `power` exceeds [`MAX_TRANSMIT_POWER`].
    pub async fn set_transmit_power(session: &Session, power: u8) -> Result<Status, CommandError> {
        CommandError::check_max("transmit power", power, MAX_TRANSMIT_POWER)?;
        CommandDispatcher::send(session, CommandId::SetTransmitPower, &[&power], &power).await
    }

    /// Sends `count` test packets. Never retried, since each attempt
    /// transmits again.
    ///
    /// # Errors
    ///
    /// Returns an error when `count` is zero.
    pub async fn transmit_packets(session: &Session, count: u32) -> Result<Status, CommandError> {
        if count == 0 {
            return Err(CommandError::BelowMinimum {
                field: "packet count",
                value: 0,
                min: 1,
            });
        }
        CommandDispatcher::send(session, CommandId::TransmitPackets, &[&count], &count).await
    }

    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn rx_statistics(session: &Session) -> Result<Reply<RxStatistics>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetRxStatistics, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn reset_rx_statistics(session: &Session) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::ResetRxStatistics, &[], &()).await
    }

    /// Link quality figure reported by the radio.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn system_quality(session: &Session) -> Result<Reply<u16>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetSystemQuality, &[], &()).await
    }

    /// Die temperature in degrees Celsius.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn temperature(session: &Session) -> Result<Reply<u16>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetTemperature, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn time_info(session: &Session) -> Result<Reply<TimeInfo>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetTimeInfo, &[], &()).await
    }

    /// Transmit duty cycle in percent.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn duty_cycle(session: &Session) -> Result<Reply<u8>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetDutyCycle, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn set_power_compensation(
        session: &Session,
        enable: bool,
    ) -> Result<Status, CommandError> {
        CommandDispatcher::send(
            session,
            CommandId::SetPowerCompensation,
            &[&u8::from(enable)],
            &enable,
        )
        .await
    }

    /// Drains the module's system log buffer.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn syslog_data(session: &Session) -> Result<Reply<Vec<u8>>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetSyslogData, &[], &()).await
    }

    /// Averages `samples` power detector readings taken `delay` apart.
    ///
    /// # Errors
    ///
    /// Returns an error when `samples` is zero.
    pub async fn pdout(
        session: &Session,
        delay: u16,
        samples: u16,
    ) -> Result<Reply<u16>, CommandError> {
        if samples == 0 {
            return Err(CommandError::BelowMinimum {
                field: "pdout samples",
                value: 0,
                min: 1,
            });
        }
        CommandDispatcher::call(
            session,
            CommandId::GetPdout,
            &[&delay, &samples],
            &(delay, samples),
        )
        .await
    }

    async fn antenna(session: &Session, shift: u16) -> Result<Reply<u8>, CommandError> {
        Ok(RegisterHandler::read(session, ANTENNA_REGISTER)
            .await?
            .map(|value| u8::try_from((value >> shift) & ANTENNA_MASK).unwrap_or(u8::MAX)))
    }

    /// Antenna the radio last transmitted on.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn tx_antenna(session: &Session) -> Result<Reply<u8>, CommandError> {
        Self::antenna(session, TX_ANTENNA_SHIFT).await
    }

    /// Antenna the radio last received on.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn rx_antenna(session: &Session) -> Result<Reply<u8>, CommandError> {
        Self::antenna(session, RX_ANTENNA_SHIFT).await
    }

    /// Reads the MAC the radio stamps on outgoing packets.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn source_mac(session: &Session) -> Result<Reply<MacAddress>, CommandError> {
        let mut octets = [0u8; 6];
        for (register, pair) in SOURCE_MAC_REGISTERS.iter().zip(octets.chunks_exact_mut(2)) {
            let (status, value) = RegisterHandler::read(session, *register).await?.into_parts();
            let Some(value) = value else {
                return Ok(Reply::failed(status));
            };
            pair.copy_from_slice(&value.to_le_bytes());
        }
        Ok(Reply::new(Status::Success, Some(MacAddress::new(octets))))
    }

    /// Overrides the radio's source MAC until the next reset.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn set_source_mac(
        session: &Session,
        mac: MacAddress,
    ) -> Result<Status, CommandError> {
        let octets = mac.octets();
        for (register, pair) in SOURCE_MAC_REGISTERS.iter().zip(octets.chunks_exact(2)) {
            let status =
                RegisterHandler::write(session, *register, u16::from_le_bytes([pair[0], pair[1]]))
                    .await?;
            if !status.is_success() {
                return Ok(status);
            }
        }
        Ok(Status::Success)
    }

    /// Writes one register inside a radio.
    ///
    /// # Errors
    ///
    /// Returns an error when `radio` is not a valid radio index.
    pub async fn write_radio_register(
        session: &Session,
        radio: u8,
        address: u8,
        value: u8,
    ) -> Result<Status, CommandError> {
        CommandError::check_max("radio", radio, MAX_RADIO_INDEX)?;
        CommandDispatcher::send(
            session,
            CommandId::WriteRadioRegister,
            &[&radio, &format!("0x{address:02X}"), &format!("0x{value:02X}")],
            &(radio, address, value),
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
    use crate::hw::{FakeTransport, SimulatedDevice};
    use crate::protocol::DeviceClass;

    async fn slave_session() -> (SimulatedDevice, Session) {
        let device = SimulatedDevice::slave(MacAddress::new([0x02, 0xEA, 0, 0, 0, 0x07]));
        let session = Session::new(DeviceClass::Slave, Box::new(device.transport("sim")));
        assert!(session.open().await);
        (device, session)
    }

    #[tokio::test]
    async fn channel_round_trips() {
        let (_device, session) = slave_session().await;

        let status = RadioHandler::set_channel(&session, 0, 149)
            .await
            .expect("channel should validate");
        let channel = RadioHandler::channel(&session)
            .await
            .expect("channel query should validate");

        assert_eq!(Status::Success, status);
        assert_eq!(Some(149), channel.into_value());
    }

    #[tokio::test]
    async fn transmit_power_is_range_checked_before_sending() {
        let transport = FakeTransport::silent("sim");
        let journal = transport.journal();
        let session = Session::new(DeviceClass::Slave, Box::new(transport));
        assert!(session.open().await);

        assert_matches!(
            RadioHandler::set_transmit_power(&session, 40).await,
            Err(CommandError::OutOfRange {
                field: "transmit power",
                value: 40,
                max: 31
            })
        );
        assert_eq!(0, journal.frame_count());
    }

    #[tokio::test]
    async fn transmitted_packets_show_up_in_rx_statistics() {
        let (_device, session) = slave_session().await;

        RadioHandler::transmit_packets(&session, 250)
            .await
            .expect("packet count should validate");
        let stats = RadioHandler::rx_statistics(&session)
            .await
            .expect("stats query should validate")
            .into_value()
            .expect("stats should be returned");
        assert_eq!(250, stats.total_packets);

        RadioHandler::reset_rx_statistics(&session)
            .await
            .expect("reset should validate");
        let stats = RadioHandler::rx_statistics(&session)
            .await
            .expect("stats query should validate");
        assert_eq!(Some(&RxStatistics::default()), stats.value());
    }

    #[tokio::test]
    async fn antennas_are_read_from_the_shared_register() {
        let device = SimulatedDevice::slave(MacAddress::new([0x02, 0xEA, 0, 0, 0, 0x07]))
            .with_register(0x0040_1018, 0b1001_0000);
        let session = Session::new(DeviceClass::Slave, Box::new(device.transport("sim")));
        assert!(session.open().await);

        assert_eq!(
            (Some(2), Some(1)),
            (
                RadioHandler::tx_antenna(&session)
                    .await
                    .expect("tx antenna query should validate")
                    .into_value(),
                RadioHandler::rx_antenna(&session)
                    .await
                    .expect("rx antenna query should validate")
                    .into_value(),
            )
        );
    }

    #[tokio::test]
    async fn source_mac_is_split_across_three_registers() {
        let (device, session) = slave_session().await;
        let mac = MacAddress::new([0x02, 0xEA, 0x10, 0x20, 0x30, 0x40]);

        assert_eq!(Ok(Status::Success), RadioHandler::set_source_mac(&session, mac).await);

        assert_eq!(Some(0xEA02), device.register(0x0040_3018));
        assert_eq!(Some(0x4030), device.register(0x0040_3020));
        assert_eq!(
            Some(mac),
            RadioHandler::source_mac(&session)
                .await
                .expect("source mac query should validate")
                .into_value()
        );
    }

    #[tokio::test]
    async fn pdout_and_syslog_are_returned() {
        let (_device, session) = slave_session().await;

        assert_matches!(
            RadioHandler::pdout(&session, 10, 0).await,
            Err(CommandError::BelowMinimum { min: 1, .. })
        );
        assert!(
            RadioHandler::pdout(&session, 10, 8)
                .await
                .expect("pdout should validate")
                .value()
                .is_some()
        );
        assert!(
            RadioHandler::syslog_data(&session)
                .await
                .expect("syslog query should validate")
                .is_success()
        );
    }

    #[tokio::test]
    async fn zero_packets_is_rejected() {
        let (_device, session) = slave_session().await;
        assert_matches!(
            RadioHandler::transmit_packets(&session, 0).await,
            Err(CommandError::BelowMinimum { min: 1, .. })
        );
    }

    #[tokio::test]
    async fn diagnostic_queries_return_values() {
        let (_device, session) = slave_session().await;

        assert_eq!(
            Some(41),
            RadioHandler::temperature(&session)
                .await
                .expect("temperature should validate")
                .into_value()
        );
        assert_eq!(
            Some(18),
            RadioHandler::duty_cycle(&session)
                .await
                .expect("duty cycle should validate")
                .into_value()
        );
        assert_eq!(
            Status::Success,
            RadioHandler::write_radio_register(&session, 1, 0x20, 0x7F)
                .await
                .expect("wrr should validate")
        );
    }
}
