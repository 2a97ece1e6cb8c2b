use serde::Serialize;
use thiserror::Error;

use super::dispatch::{CommandDispatcher, CommandError, Reply};
use super::network::MAX_SPEAKER_INDEX;
use super::payload::{PayloadError, PayloadReader, PayloadWriter, WirePayload};
use crate::hw::Session;
use crate::protocol::CommandId;
use crate::status::Status;

const MAX_VOLUME: u8 = 100;
/// Highest zone an application may declare with [`AudioHandler::set_max_zone`].
pub const MAX_ZONE: u8 = 7;
/// Entries in a full I2S input map, one per speaker type.
pub const I2S_MAP_ENTRIES: usize = 11;

/// Errors returned by volume validation.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum VolumeError {
    #[error("volume {value} is out of range (0..={max})")]
    OutOfRange { value: u8, max: u8 },
}

/// Validated master volume in the inclusive range `0..=100`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Volume(u8);

impl Volume {
    /// Creates a validated volume.
    ///
    /// ```
    /// use summit::Volume;
    ///
    /// let volume = Volume::new(40)?;
    /// assert_eq!(40, volume.value());
    /// assert!(Volume::new(101).is_err());
    /// # Ok::<(), summit::VolumeError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when `value` is above 100.
    pub fn new(value: u8) -> Result<Self, VolumeError> {
        if value > MAX_VOLUME {
            return Err(VolumeError::OutOfRange {
                value,
                max: MAX_VOLUME,
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

/// One byte on the wire; values above 100 read back as 100.
impl WirePayload for Volume {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(self.0);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self(input.u8()?.min(MAX_VOLUME)))
    }
}

/// Master I2S port configuration.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct AudioClockSetup {
    pub audio_source: u8,
    pub sclk_frequency: u8,
    /// The master drives the bit and frame clocks.
    pub drive_clocks: bool,
    pub mclk_frequency: u8,
    pub mclk_output_enable: bool,
}

impl WirePayload for AudioClockSetup {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(self.audio_source).u8(self.sclk_frequency);
        self.drive_clocks.encode(out);
        out.u8(self.mclk_frequency);
        self.mclk_output_enable.encode(out);
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        Ok(Self {
            audio_source: input.u8()?,
            sclk_frequency: input.u8()?,
            drive_clocks: bool::decode(input)?,
            mclk_frequency: input.u8()?,
            mclk_output_enable: bool::decode(input)?,
        })
    }
}

/// Routes one speaker type to a codec I2S channel.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct I2sChannel {
    pub codec_i2s_channel: u8,
    pub codec_channel: u8,
    pub speaker_type: u8,
}

/// Speaker-type to I2S channel associations: a count byte, then three bytes
/// per entry.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct I2sInputMap(pub Vec<I2sChannel>);

impl WirePayload for I2sInputMap {
    fn encode(&self, out: &mut PayloadWriter) {
        out.u8(u8::try_from(self.0.len()).unwrap_or(u8::MAX));
        for entry in self.0.iter().take(usize::from(u8::MAX)) {
            out.u8(entry.codec_i2s_channel)
                .u8(entry.codec_channel)
                .u8(entry.speaker_type);
        }
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self, PayloadError> {
        let count = input.u8()?;
        (0..count)
            .map(|_index| {
                Ok(I2sChannel {
                    codec_i2s_channel: input.u8()?,
                    codec_channel: input.u8()?,
                    speaker_type: input.u8()?,
                })
            })
            .collect::<Result<Vec<_>, PayloadError>>()
            .map(Self)
    }
}

/// Handler for master audio controls.
pub struct AudioHandler;

impl AudioHandler {
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn volume(session: &Session) -> Result<Reply<Volume>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetVolume, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_volume(session: &Session, volume: Volume) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::SetVolume, &[&volume.value()], &volume).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn is_muted(session: &Session) -> Result<Reply<bool>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetMute, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_mute(session: &Session, mute: bool) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::SetMute, &[&mute], &mute).await
    }

    /// Zone the master currently plays into.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn zone(session: &Session) -> Result<Reply<u8>, CommandError> {
        CommandDispatcher::call(session, CommandId::GetZone, &[], &()).await
    }

    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_zone(session: &Session, zone: u8) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::SetZone, &[&zone], &zone).await
    }

    /// Highest zone the receivers accept.
    ///
    /// # Errors
    ///
    /// Returns an error when `zone` is above [`MAX_ZONE`].
    pub async fn set_max_zone(session: &Session, zone: u8) -> Result<Status, CommandError> {
        CommandError::check_max("max zone", zone, MAX_ZONE)?;
        CommandDispatcher::send(session, CommandId::SetMaxZone, &[&zone], &zone).await
    }

    /// Enables or disables receiver-side zone control.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_rx_control(session: &Session, enable: bool) -> Result<Status, CommandError> {
        CommandDispatcher::send(session, CommandId::SetRxControl, &[&enable], &enable).await
    }

    /// Sets the device address the software IR filter accepts.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_ir_filter(session: &Session, address: u16) -> Result<Status, CommandError> {
        CommandDispatcher::send(
            session,
            CommandId::SetIrFilter,
            &[&format!("0x{address:04X}")],
            &address,
        )
        .await
    }

    /// Configures the master's I2S clocks.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not attached to a master.
    pub async fn set_audio_clock(
        session: &Session,
        setup: AudioClockSetup,
    ) -> Result<Status, CommandError> {
        CommandDispatcher::send(
            session,
            CommandId::SetupAudioClock,
            &[&setup.audio_source, &setup.sclk_frequency, &setup.mclk_frequency],
            &setup,
        )
        .await
    }

    /// Associates speaker types with I2S channels.
    ///
    /// # Errors
    ///
    /// Returns an error when the map has more than [`I2S_MAP_ENTRIES`]
    /// entries.
    pub async fn set_i2s_input_map(
        session: &Session,
        map: &I2sInputMap,
    ) -> Result<Status, CommandError> {
        let entries = map.0.len();
        if entries > I2S_MAP_ENTRIES {
            return Err(CommandError::OutOfRange {
                field: "I2S map entries",
                value: u64::try_from(entries).unwrap_or(u64::MAX),
                max: I2S_MAP_ENTRIES as u64,
            });
        }
        CommandDispatcher::send(session, CommandId::SetI2sInputMap, &[&entries], map).await
    }

    /// Log volume trim, in dB, applied by one speaker.
    ///
    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    pub async fn volume_trim(session: &Session, speaker: u8) -> Result<Reply<i16>, CommandError> {
        CommandError::check_max("speaker index", speaker, MAX_SPEAKER_INDEX)?;
        CommandDispatcher::call(session, CommandId::GetVolumeTrim, &[&speaker], &speaker).await
    }

    /// Asks the master to apply a new log volume trim to one speaker.
    ///
    /// # Errors
    ///
    /// Returns an error when `speaker` is out of range.
    pub async fn set_volume_trim(
        session: &Session,
        speaker: u8,
        trim: i16,
    ) -> Result<Status, CommandError> {
        CommandError::check_max("speaker index", speaker, MAX_SPEAKER_INDEX)?;
        CommandDispatcher::send(
            session,
            CommandId::SetVolumeTrim,
            &[&speaker, &trim],
            &(speaker, trim),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::handlers::{MacAddress, decode_payload, encode_payload};
    use crate::hw::SimulatedDevice;
    use crate::protocol::DeviceClass;

    #[rstest]
    #[case(0, true)]
    #[case(100, true)]
    #[case(101, false)]
    fn volume_accepts_zero_through_one_hundred(#[case] value: u8, #[case] accepted: bool) {
        assert_eq!(accepted, Volume::new(value).is_ok());
    }

    #[rstest]
    #[case(0)]
    #[case(55)]
    #[case(100)]
    fn volume_round_trips_on_the_wire(#[case] value: u8) {
        let volume = Volume::new(value).expect("volume should be in range");
        assert_eq!(vec![value], encode_payload(&volume));
        assert_eq!(
            volume,
            decode_payload::<Volume>(&encode_payload(&volume)).expect("volume should decode")
        );
    }

    #[test]
    fn device_volume_above_the_limit_reads_as_the_limit() {
        assert_eq!(
            Volume::new(100).expect("100 is the limit"),
            decode_payload::<Volume>(&[0xC8]).expect("volume should decode")
        );
    }

    #[tokio::test]
    async fn audio_settings_reach_the_master() {
        let device = SimulatedDevice::master(MacAddress::new([0x02, 0xEA, 0, 0, 0, 0x01]));
        let session = Session::new(DeviceClass::Master, Box::new(device.transport("sim")));
        assert!(session.open().await);

        let volume = Volume::new(72).expect("72 should be a valid volume");
        AudioHandler::set_volume(&session, volume)
            .await
            .expect("volume should validate");
        AudioHandler::set_mute(&session, true)
            .await
            .expect("mute should validate");
        AudioHandler::set_zone(&session, 2)
            .await
            .expect("zone should validate");

        assert_eq!((72, true, 2), (device.volume(), device.is_muted(), device.zone()));
        assert_eq!(
            Some(volume),
            AudioHandler::volume(&session)
                .await
                .expect("volume query should validate")
                .into_value()
        );
        assert_eq!(
            Some(2),
            AudioHandler::zone(&session)
                .await
                .expect("zone query should validate")
                .into_value()
        );
    }

    fn master() -> (SimulatedDevice, Session) {
        let device = SimulatedDevice::master(MacAddress::new([0x02, 0xEA, 0, 0, 0, 0x01]));
        let session = Session::new(DeviceClass::Master, Box::new(device.transport("sim")));
        (device, session)
    }

    #[tokio::test]
    async fn zone_path_settings_reach_the_master() {
        let (device, session) = master();
        assert!(session.open().await);

        AudioHandler::set_max_zone(&session, 4)
            .await
            .expect("max zone should validate");
        AudioHandler::set_rx_control(&session, true)
            .await
            .expect("rx control should validate");
        AudioHandler::set_ir_filter(&session, 0x04FB)
            .await
            .expect("ir filter should validate");

        assert_eq!(
            (4, true, 0x04FB),
            (device.max_zone(), device.rx_control(), device.ir_filter())
        );
        assert_matches!(
            AudioHandler::set_max_zone(&session, MAX_ZONE + 1).await,
            Err(CommandError::OutOfRange { max: 7, .. })
        );
    }

    #[tokio::test]
    async fn i2s_configuration_is_stored() {
        let (device, session) = master();
        assert!(session.open().await);
        let setup = AudioClockSetup {
            audio_source: 1,
            sclk_frequency: 2,
            drive_clocks: true,
            mclk_frequency: 3,
            mclk_output_enable: true,
        };
        let map = I2sInputMap(vec![
            I2sChannel {
                codec_i2s_channel: 0,
                codec_channel: 0,
                speaker_type: 1,
            },
            I2sChannel {
                codec_i2s_channel: 0,
                codec_channel: 1,
                speaker_type: 2,
            },
        ]);

        assert_eq!(Ok(Status::Success), AudioHandler::set_audio_clock(&session, setup).await);
        assert_eq!(Ok(Status::Success), AudioHandler::set_i2s_input_map(&session, &map).await);

        assert_eq!(setup, device.audio_clock());
        assert_eq!(map, device.i2s_map());
    }

    #[tokio::test]
    async fn oversized_i2s_map_is_refused_before_sending() {
        let (_device, session) = master();
        assert!(session.open().await);
        let map = I2sInputMap(vec![I2sChannel::default(); I2S_MAP_ENTRIES + 1]);

        assert_matches!(
            AudioHandler::set_i2s_input_map(&session, &map).await,
            Err(CommandError::OutOfRange {
                field: "I2S map entries",
                value: 12,
                max: 11
            })
        );
    }

    #[test]
    fn i2s_map_is_count_prefixed() {
        let map = I2sInputMap(vec![I2sChannel {
            codec_i2s_channel: 1,
            codec_channel: 2,
            speaker_type: 3,
        }]);
        assert_eq!(vec![1, 1, 2, 3], encode_payload(&map));
        assert_eq!(map, decode_payload(&[1, 1, 2, 3]).expect("map should decode"));
    }

    #[tokio::test]
    async fn volume_trim_is_kept_per_speaker() {
        let (_device, session) = master();
        assert!(session.open().await);

        AudioHandler::set_volume_trim(&session, 3, -6)
            .await
            .expect("trim should validate");

        assert_eq!(
            (Some(-6), Some(0)),
            (
                AudioHandler::volume_trim(&session, 3)
                    .await
                    .expect("trim query should validate")
                    .into_value(),
                AudioHandler::volume_trim(&session, 4)
                    .await
                    .expect("trim query should validate")
                    .into_value(),
            )
        );
    }
}
