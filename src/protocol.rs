use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::handlers::{Frame, Opcode};

/// Class of a physical Summit module.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Transmitter hub coordinating the wireless network.
    #[strum(to_string = "master")]
    Master,
    /// Receiver module attached to one speaker.
    #[strum(to_string = "slave")]
    Slave,
}

/// Opcode space a command belongs to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum CommandFamily {
    /// Accepted by both device classes.
    #[strum(to_string = "common")]
    Common,
    /// Network and master management commands.
    #[strum(to_string = "master")]
    Master,
    /// Per-speaker commands.
    #[strum(to_string = "slave")]
    Slave,
}

impl CommandFamily {
    /// Returns whether a session of `class` may issue commands of this family.
    #[must_use]
    pub const fn allows(self, class: DeviceClass) -> bool {
        matches!(
            (self, class),
            (Self::Common, _) | (Self::Master, DeviceClass::Master) | (Self::Slave, DeviceClass::Slave)
        )
    }
}

/// Whether a command reads state or changes it.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
pub enum CommandAccess {
    #[strum(to_string = "query")]
    Query,
    #[strum(to_string = "update")]
    Update,
}

/// Whether the retry layer may re-issue a command verbatim.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum RetryPolicy {
    /// Safe to repeat; the session retry count applies.
    #[strum(to_string = "idempotent")]
    Idempotent,
    /// Has side effects per delivery; exactly one attempt is made.
    #[strum(to_string = "single_attempt")]
    SingleAttempt,
}

/// When telemetry records are emitted for a command.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum DatalogMode {
    /// One record per attempt, flagging attempts that will be retried.
    #[strum(to_string = "per_attempt")]
    PerAttempt,
    /// One record for the final outcome.
    #[strum(to_string = "once")]
    Once,
    /// No telemetry.
    #[strum(to_string = "off")]
    Off,
}

/// Every command the engine knows how to issue.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum CommandId {
    #[strum(to_string = "rd")]
    ReadRegister,
    #[strum(to_string = "wr")]
    WriteRegister,
    #[strum(to_string = "get_radio_channel")]
    GetRadioChannel,
    #[strum(to_string = "set_radio_channel")]
    SetRadioChannel,
    #[strum(to_string = "get_transmit_power")]
    GetTransmitPower,
    #[strum(to_string = "set_transmit_power")]
    SetTransmitPower,
    #[strum(to_string = "transmit_packets")]
    TransmitPackets,
    #[strum(to_string = "receive_statistics")]
    GetRxStatistics,
    #[strum(to_string = "reset_rx_statistics")]
    ResetRxStatistics,
    #[strum(to_string = "get_system_quality")]
    GetSystemQuality,
    #[strum(to_string = "temperature")]
    GetTemperature,
    #[strum(to_string = "get_time_info")]
    GetTimeInfo,
    #[strum(to_string = "get_duty_cycle")]
    GetDutyCycle,
    #[strum(to_string = "set_power_comp_enable")]
    SetPowerCompensation,
    #[strum(to_string = "wrr")]
    WriteRadioRegister,
    #[strum(to_string = "get_flash")]
    ReadFlash,
    #[strum(to_string = "set_flash")]
    WriteFlash,
    #[strum(to_string = "erase_flash")]
    EraseFlash,
    #[strum(to_string = "get_active_image")]
    GetActiveImage,
    #[strum(to_string = "set_active_image")]
    SetActiveImage,
    #[strum(to_string = "load_firmware")]
    LoadFirmware,
    #[strum(to_string = "check_active_image")]
    CheckImage,
    #[strum(to_string = "erase_fw_image")]
    EraseImage,
    #[strum(to_string = "load_fw_to_eeprom")]
    CopyFirmwareToEeprom,
    #[strum(to_string = "load_fw_from_eeprom")]
    CopyFirmwareFromEeprom,
    #[strum(to_string = "save_master_mfg_data")]
    SaveMasterMfgData,
    #[strum(to_string = "get_master_info")]
    GetMasterInfo,
    #[strum(to_string = "get_slave_count")]
    GetSpeakerCount,
    #[strum(to_string = "get_map_type")]
    GetMapType,
    #[strum(to_string = "set_map_type")]
    SetMapType,
    #[strum(to_string = "save_configuration")]
    SaveConfiguration,
    #[strum(to_string = "shutdown")]
    Shutdown,
    #[strum(to_string = "get_dfs_engine_state")]
    GetDfsEngineState,
    #[strum(to_string = "restore")]
    Restore,
    #[strum(to_string = "get_zone")]
    GetZone,
    #[strum(to_string = "set_zone")]
    SetZone,
    #[strum(to_string = "get_autostart")]
    GetAutostart,
    #[strum(to_string = "set_autostart")]
    SetAutostart,
    #[strum(to_string = "get_led_disable")]
    GetLedDisable,
    #[strum(to_string = "set_led_disable")]
    SetLedDisable,
    #[strum(to_string = "beacon")]
    Beacon,
    #[strum(to_string = "discover")]
    Discover,
    #[strum(to_string = "set_slot")]
    AssignSlot,
    #[strum(to_string = "reset_speaker")]
    ResetSpeaker,
    #[strum(to_string = "get_speaker_info")]
    GetSpeakerInfo,
    #[strum(to_string = "echo")]
    Echo,
    #[strum(to_string = "set_coefficient_table")]
    SelectCoefficientTable,
    #[strum(to_string = "set_delay")]
    SetAudioDelay,
    #[strum(to_string = "start")]
    Start,
    #[strum(to_string = "stop")]
    Stop,
    #[strum(to_string = "get_volume")]
    GetVolume,
    #[strum(to_string = "set_volume")]
    SetVolume,
    #[strum(to_string = "get_mute")]
    GetMute,
    #[strum(to_string = "set_mute")]
    SetMute,
    #[strum(to_string = "chime")]
    Chime,
    #[strum(to_string = "get_dfs_static_channels")]
    GetDfsStaticChannels,
    #[strum(to_string = "set_dfs_override")]
    SetDfsOverride,
    #[strum(to_string = "get_tpm_mode")]
    GetTpmMode,
    #[strum(to_string = "set_tpm_mode")]
    SetTpmMode,
    #[strum(to_string = "get_local_info")]
    GetLocalInfo,
    #[strum(to_string = "save_speaker_mfg_data")]
    SaveSlaveMfgData,
    #[strum(to_string = "chime_rx")]
    SlaveChime,
    #[strum(to_string = "set_master_descriptor_info")]
    SetMasterInfo,
    #[strum(to_string = "set_local_info")]
    SetLocalInfo,
    #[strum(to_string = "set_i2s_clocks")]
    SetupAudioClock,
    #[strum(to_string = "set_i2s_input_map")]
    SetI2sInputMap,
    #[strum(to_string = "set_ir_filter")]
    SetIrFilter,
    #[strum(to_string = "set_rx_control")]
    SetRxControl,
    #[strum(to_string = "set_max_zone")]
    SetMaxZone,
    #[strum(to_string = "get_block_events_enable")]
    GetBlockEvents,
    #[strum(to_string = "set_block_events_enable")]
    SetBlockEvents,
    #[strum(to_string = "get_volume_trim")]
    GetVolumeTrim,
    #[strum(to_string = "set_volume_trim")]
    SetVolumeTrim,
    #[strum(to_string = "get_syslog_data")]
    GetSyslogData,
    #[strum(to_string = "get_pdout")]
    GetPdout,
}

impl CommandId {
    /// Returns the registry entry for this command.
    #[must_use]
    pub fn metadata(self) -> CommandMetadata {
        command_metadata(self)
    }
}

/// Registry entry describing how one command is issued.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CommandMetadata {
    opcode: Opcode,
    access: CommandAccess,
    family: CommandFamily,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    datalog: DatalogMode,
}

impl CommandMetadata {
    /// Main/secondary opcode pair.
    #[must_use]
    pub fn opcode(self) -> Opcode {
        self.opcode
    }

    /// Query or update direction, carried in the frame flags.
    #[must_use]
    pub fn access(self) -> CommandAccess {
        self.access
    }

    /// Opcode family, used to validate the target device class.
    #[must_use]
    pub fn family(self) -> CommandFamily {
        self.family
    }

    /// Retry policy.
    #[must_use]
    pub fn retry(self) -> RetryPolicy {
        self.retry
    }

    /// Extended per-attempt timeout, if the command needs one.
    #[must_use]
    pub fn timeout(self) -> Option<Duration> {
        self.timeout
    }

    /// Telemetry mode.
    #[must_use]
    pub fn datalog(self) -> DatalogMode {
        self.datalog
    }
}

/// Command metadata keyed by typed command IDs.
pub(crate) static COMMANDS_BY_ID: LazyLock<HashMap<CommandId, CommandMetadata>> =
    LazyLock::new(|| {
        CommandId::iter()
            .map(|command| (command, metadata_for(command)))
            .collect()
    });

/// Returns metadata for one command.
pub(crate) fn command_metadata(command: CommandId) -> CommandMetadata {
    *COMMANDS_BY_ID
        .get(&command)
        .unwrap_or(&metadata_for(command))
}

/// Finds the command registered for an opcode pair and access direction.
///
/// Both EEPROM copies share `0x40/0x05`; this resolves that pair to
/// [`CommandId::CopyFirmwareToEeprom`]. Use [`command_for_request`] when the
/// payload is at hand.
pub(crate) fn command_for_opcode(opcode: Opcode, access: CommandAccess) -> Option<CommandId> {
    CommandId::iter().find(|command| {
        let metadata = command_metadata(*command);
        metadata.opcode == opcode && metadata.access == access
    })
}

/// Leading payload byte of an EEPROM copy that stores a flash slot.
pub(crate) const FLASH_TO_EEPROM: u8 = 0;
/// Leading payload byte of an EEPROM copy that programs a flash slot.
pub(crate) const EEPROM_TO_FLASH: u8 = 1;

/// Finds the command a request frame carries, telling the two EEPROM copies
/// apart by their direction byte.
pub(crate) fn command_for_request(request: &Frame) -> Option<CommandId> {
    match command_for_opcode(request.opcode(), request.access())? {
        CommandId::CopyFirmwareToEeprom | CommandId::CopyFirmwareFromEeprom => {
            match request.payload().first() {
                Some(&EEPROM_TO_FLASH) => Some(CommandId::CopyFirmwareFromEeprom),
                _ => Some(CommandId::CopyFirmwareToEeprom),
            }
        }
        command => Some(command),
    }
}

/// Returns all known commands.
pub(crate) fn known_commands() -> impl Iterator<Item = CommandId> {
    CommandId::iter()
}

const FLASH_TIMEOUT: Duration = Duration::from_secs(3);

fn metadata_for(command: CommandId) -> CommandMetadata {
    use CommandAccess::{Query, Update};
    use CommandFamily::{Common, Master, Slave};
    use DatalogMode::{Off, Once, PerAttempt};
    use RetryPolicy::{Idempotent, SingleAttempt};

    let entry = |main: u8, secondary: u8, access, family, retry, datalog| CommandMetadata {
        opcode: Opcode::new(main, secondary),
        access,
        family,
        retry,
        timeout: None,
        datalog,
    };
    let extended = |metadata: CommandMetadata, timeout: Duration| CommandMetadata {
        timeout: Some(timeout),
        ..metadata
    };

    match command {
        CommandId::ReadRegister => entry(0x60, 0x05, Query, Common, Idempotent, PerAttempt),
        CommandId::WriteRegister => entry(0x60, 0x05, Update, Common, Idempotent, PerAttempt),
        CommandId::GetRadioChannel => entry(0x60, 0x06, Query, Common, Idempotent, Once),
        CommandId::SetRadioChannel => entry(0x60, 0x06, Update, Common, Idempotent, PerAttempt),
        CommandId::GetTransmitPower => entry(0x60, 0x17, Query, Common, Idempotent, Once),
        CommandId::SetTransmitPower => entry(0x60, 0x17, Update, Common, Idempotent, PerAttempt),
        CommandId::TransmitPackets => extended(
            entry(0x60, 0x08, Update, Common, SingleAttempt, Once),
            Duration::from_secs(20),
        ),
        CommandId::GetRxStatistics => entry(0x60, 0x09, Query, Common, Idempotent, Once),
        CommandId::ResetRxStatistics => entry(0x60, 0x09, Update, Common, Idempotent, Once),
        CommandId::GetSystemQuality => entry(0x60, 0x0E, Query, Common, Idempotent, Once),
        CommandId::GetTemperature => entry(0x60, 0x0B, Query, Common, Idempotent, PerAttempt),
        CommandId::GetTimeInfo => entry(0x60, 0x11, Query, Common, Idempotent, Off),
        CommandId::GetDutyCycle => entry(0x60, 0x1A, Query, Common, Idempotent, PerAttempt),
        CommandId::SetPowerCompensation => entry(0x60, 0x07, Update, Common, Idempotent, Off),
        CommandId::WriteRadioRegister => {
            entry(0x60, 0x19, Update, Common, Idempotent, PerAttempt)
        }
        CommandId::ReadFlash => entry(0x60, 0x01, Query, Common, Idempotent, PerAttempt),
        CommandId::WriteFlash => entry(0x60, 0x02, Update, Common, Idempotent, PerAttempt),
        CommandId::EraseFlash => extended(
            entry(0x60, 0x03, Update, Common, Idempotent, PerAttempt),
            FLASH_TIMEOUT,
        ),
        CommandId::GetActiveImage => entry(0x40, 0x01, Query, Common, Idempotent, PerAttempt),
        CommandId::SetActiveImage => extended(
            entry(0x40, 0x01, Update, Common, Idempotent, PerAttempt),
            FLASH_TIMEOUT,
        ),
        CommandId::LoadFirmware => extended(
            entry(0x40, 0x02, Update, Common, Idempotent, PerAttempt),
            FLASH_TIMEOUT,
        ),
        CommandId::CheckImage => extended(
            entry(0x40, 0x03, Query, Common, Idempotent, PerAttempt),
            FLASH_TIMEOUT,
        ),
        CommandId::EraseImage => extended(
            entry(0x40, 0x04, Update, Common, Idempotent, PerAttempt),
            FLASH_TIMEOUT,
        ),
        CommandId::CopyFirmwareToEeprom => extended(
            entry(0x40, 0x05, Update, Common, SingleAttempt, Once),
            Duration::from_secs(30),
        ),
        CommandId::CopyFirmwareFromEeprom => extended(
            entry(0x40, 0x05, Update, Common, SingleAttempt, Once),
            Duration::from_secs(20),
        ),
        CommandId::SaveMasterMfgData => entry(0x10, 0x01, Update, Master, Idempotent, Once),
        CommandId::GetMasterInfo => entry(0x10, 0x02, Query, Master, Idempotent, PerAttempt),
        CommandId::GetSpeakerCount => entry(0x10, 0x03, Query, Master, Idempotent, PerAttempt),
        CommandId::GetMapType => entry(0x10, 0x08, Query, Master, Idempotent, Once),
        CommandId::SetMapType => entry(0x10, 0x08, Update, Master, Idempotent, PerAttempt),
        CommandId::SaveConfiguration => entry(0x10, 0x0A, Update, Master, Idempotent, Once),
        CommandId::Shutdown => entry(0x10, 0x0B, Update, Master, SingleAttempt, Once),
        CommandId::GetDfsEngineState => entry(0x10, 0x0F, Query, Master, Idempotent, Once),
        CommandId::Restore => entry(0x10, 0x10, Update, Master, SingleAttempt, Once),
        CommandId::GetZone => entry(0x10, 0x11, Query, Master, Idempotent, PerAttempt),
        CommandId::SetZone => entry(0x10, 0x11, Update, Master, Idempotent, PerAttempt),
        CommandId::GetAutostart => entry(0x10, 0x13, Query, Master, Idempotent, Once),
        CommandId::SetAutostart => entry(0x10, 0x13, Update, Master, Idempotent, PerAttempt),
        CommandId::GetLedDisable => entry(0x10, 0x19, Query, Master, Idempotent, Once),
        CommandId::SetLedDisable => entry(0x10, 0x19, Update, Master, Idempotent, PerAttempt),
        CommandId::Beacon => entry(0x20, 0x01, Update, Master, Idempotent, PerAttempt),
        CommandId::Discover => entry(0x20, 0x02, Update, Master, Idempotent, PerAttempt),
        CommandId::AssignSlot => entry(0x20, 0x03, Update, Master, Idempotent, PerAttempt),
        CommandId::ResetSpeaker => entry(0x20, 0x04, Update, Master, SingleAttempt, Once),
        CommandId::GetSpeakerInfo => entry(0x20, 0x05, Query, Master, Idempotent, PerAttempt),
        CommandId::Echo => entry(0x20, 0x06, Query, Master, SingleAttempt, Once),
        CommandId::SelectCoefficientTable => {
            entry(0x20, 0x0A, Update, Master, Idempotent, PerAttempt)
        }
        CommandId::SetAudioDelay => entry(0x20, 0x0B, Update, Master, Idempotent, PerAttempt),
        CommandId::Start => entry(0x20, 0x0C, Update, Master, Idempotent, PerAttempt),
        CommandId::Stop => entry(0x20, 0x0D, Update, Master, Idempotent, PerAttempt),
        CommandId::GetVolume => entry(0x20, 0x0E, Query, Master, Idempotent, Once),
        CommandId::SetVolume => entry(0x20, 0x0E, Update, Master, Idempotent, PerAttempt),
        CommandId::GetMute => entry(0x20, 0x0F, Query, Master, Idempotent, Once),
        CommandId::SetMute => entry(0x20, 0x0F, Update, Master, Idempotent, PerAttempt),
        CommandId::Chime => entry(0x20, 0x19, Update, Master, SingleAttempt, Once),
        CommandId::GetDfsStaticChannels => {
            entry(0x30, 0x01, Query, Master, Idempotent, Once)
        }
        CommandId::SetDfsOverride => entry(0x30, 0x02, Update, Master, Idempotent, PerAttempt),
        CommandId::GetTpmMode => entry(0x30, 0x03, Query, Master, Idempotent, Once),
        CommandId::SetTpmMode => entry(0x30, 0x03, Update, Master, Idempotent, PerAttempt),
        CommandId::GetLocalInfo => entry(0x60, 0x0F, Query, Slave, Idempotent, PerAttempt),
        CommandId::SaveSlaveMfgData => extended(
            entry(0x60, 0x16, Update, Slave, Idempotent, Once),
            Duration::from_secs(5),
        ),
        CommandId::SlaveChime => entry(0x60, 0x15, Update, Slave, SingleAttempt, Once),
        CommandId::SetMasterInfo => entry(0x10, 0x02, Update, Master, Idempotent, Once),
        CommandId::SetLocalInfo => entry(0x60, 0x0F, Update, Slave, Idempotent, Once),
        CommandId::SetupAudioClock => entry(0x10, 0x09, Update, Master, Idempotent, Once),
        CommandId::SetI2sInputMap => entry(0x10, 0x0E, Update, Master, Idempotent, Once),
        CommandId::SetIrFilter => entry(0x10, 0x16, Update, Master, Idempotent, PerAttempt),
        CommandId::SetRxControl => entry(0x10, 0x17, Update, Master, Idempotent, PerAttempt),
        CommandId::SetMaxZone => entry(0x10, 0x18, Update, Master, Idempotent, PerAttempt),
        CommandId::GetBlockEvents => entry(0x10, 0x1A, Query, Master, Idempotent, Once),
        CommandId::SetBlockEvents => entry(0x10, 0x1A, Update, Master, Idempotent, PerAttempt),
        CommandId::GetVolumeTrim => entry(0x20, 0x1A, Query, Master, Idempotent, Once),
        CommandId::SetVolumeTrim => entry(0x20, 0x1A, Update, Master, Idempotent, PerAttempt),
        CommandId::GetSyslogData => entry(0x60, 0x10, Query, Common, Idempotent, Off),
        CommandId::GetPdout => entry(0x60, 0x13, Query, Common, Idempotent, PerAttempt),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn registry_contains_every_command() {
        assert_eq!(known_commands().count(), COMMANDS_BY_ID.len());
    }

    #[test]
    fn opcode_and_access_pairs_are_unique_apart_from_eeprom_copy() {
        let mut seen = HashSet::new();
        for command in known_commands() {
            if command == CommandId::CopyFirmwareFromEeprom {
                continue;
            }
            let metadata = command.metadata();
            assert!(
                seen.insert((metadata.opcode(), metadata.access())),
                "{command} reuses an opcode/access pair"
            );
        }
    }

    #[rstest]
    #[case(CommandId::ReadRegister, 0x60, 0x05)]
    #[case(CommandId::Beacon, 0x20, 0x01)]
    #[case(CommandId::GetActiveImage, 0x40, 0x01)]
    #[case(CommandId::GetDfsEngineState, 0x10, 0x0F)]
    #[case(CommandId::SetupAudioClock, 0x10, 0x09)]
    #[case(CommandId::SetI2sInputMap, 0x10, 0x0E)]
    #[case(CommandId::SetIrFilter, 0x10, 0x16)]
    #[case(CommandId::SetRxControl, 0x10, 0x17)]
    #[case(CommandId::GetSyslogData, 0x60, 0x10)]
    #[case(CommandId::GetPdout, 0x60, 0x13)]
    fn commands_map_to_documented_opcodes(
        #[case] command: CommandId,
        #[case] main: u8,
        #[case] secondary: u8,
    ) {
        assert_eq!(Opcode::new(main, secondary), command.metadata().opcode());
    }

    #[rstest]
    #[case(CommandId::Echo)]
    #[case(CommandId::TransmitPackets)]
    #[case(CommandId::ResetSpeaker)]
    #[case(CommandId::CopyFirmwareToEeprom)]
    fn side_effecting_commands_are_single_attempt(#[case] command: CommandId) {
        assert_eq!(RetryPolicy::SingleAttempt, command.metadata().retry());
    }

    #[rstest]
    #[case(FLASH_TO_EEPROM, CommandId::CopyFirmwareToEeprom)]
    #[case(EEPROM_TO_FLASH, CommandId::CopyFirmwareFromEeprom)]
    fn eeprom_copies_are_told_apart_by_direction(
        #[case] direction: u8,
        #[case] expected: CommandId,
    ) {
        let metadata = expected.metadata();
        let request = Frame::request(
            metadata.opcode(),
            metadata.access(),
            1,
            vec![direction, 0, 0x00, 0x00, 0x00, 0x00],
        );
        assert_eq!(Some(expected), command_for_request(&request));
    }

    #[test]
    fn opcode_lookup_distinguishes_access() {
        let opcode = Opcode::new(0x60, 0x05);
        assert_eq!(
            Some(CommandId::ReadRegister),
            command_for_opcode(opcode, CommandAccess::Query)
        );
        assert_eq!(
            Some(CommandId::WriteRegister),
            command_for_opcode(opcode, CommandAccess::Update)
        );
    }

    #[rstest]
    #[case(CommandFamily::Common, DeviceClass::Slave, true)]
    #[case(CommandFamily::Master, DeviceClass::Slave, false)]
    #[case(CommandFamily::Slave, DeviceClass::Slave, true)]
    #[case(CommandFamily::Slave, DeviceClass::Master, false)]
    fn families_gate_device_classes(
        #[case] family: CommandFamily,
        #[case] class: DeviceClass,
        #[case] expected: bool,
    ) {
        assert_eq!(expected, family.allows(class));
    }
}
