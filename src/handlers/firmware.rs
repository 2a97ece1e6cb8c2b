use std::fmt;

use super::dispatch::{CommandDispatcher, CommandError, Reply};
use super::network::MAX_SPEAKER_INDEX;
use crate::hw::Session;
use crate::protocol::{CommandId, EEPROM_TO_FLASH, FLASH_TO_EEPROM};
use crate::status::Status;

/// Address byte that makes a firmware command act on the module behind the
/// session rather than on a networked speaker.
pub const LOCAL_DEVICE: u8 = 0xFE;
/// Highest firmware slot index.
pub const MAX_SLOT_INDEX: u8 = 1;
/// `check_image` result for an image that passed its integrity check.
pub const IMAGE_OK: u8 = 0x01;

/// Module a firmware command applies to.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum DeviceAddress {
    /// The module the session talks to.
    #[default]
    Local,
    /// A speaker reached through the master, by network index.
    Speaker(u8),
}

impl DeviceAddress {
    /// Wire code for this address.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Local => LOCAL_DEVICE,
            Self::Speaker(index) => index,
        }
    }

    fn validate(self) -> Result<u8, CommandError> {
        if let Self::Speaker(index) = self {
            CommandError::check_max("speaker index", index, MAX_SPEAKER_INDEX)?;
        }
        Ok(self.code())
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.code())
    }
}

/// Handler for the two-slot firmware primitives.
pub struct FirmwareHandler;

impl FirmwareHandler {
    /// Slot the device currently boots from.
    ///
    /// # Errors
    ///
    /// Returns an error when `device` is not a valid speaker index.
    pub async fn active_image(
        session: &Session,
        device: DeviceAddress,
    ) -> Result<Reply<u8>, CommandError> {
        let code = device.validate()?;
        CommandDispatcher::call(session, CommandId::GetActiveImage, &[&device], &code).await
    }

    /// Makes `slot` the boot slot. The device verifies the slot and reboots
    /// into it.
    ///
    /// # Errors
    ///
    /// Returns an error when `device` or `slot` is out of range.
    pub async fn set_active_image(
        session: &Session,
        device: DeviceAddress,
        slot: u8,
    ) -> Result<Status, CommandError> {
        let code = device.validate()?;
        CommandError::check_max("slot", slot, MAX_SLOT_INDEX)?;
        CommandDispatcher::send(
            session,
            CommandId::SetActiveImage,
            &[&device, &slot],
            &(code, slot),
        )
        .await
    }

    /// Erases an inactive slot. A slot that is already blank answers with
    /// the invalid-command code `0x02`.
    ///
    /// # Errors
    ///
    /// Returns an error when `device` or `slot` is out of range.
    pub async fn erase_image(
        session: &Session,
        device: DeviceAddress,
        slot: u8,
    ) -> Result<Status, CommandError> {
        let code = device.validate()?;
        CommandError::check_max("slot", slot, MAX_SLOT_INDEX)?;
        CommandDispatcher::send(
            session,
            CommandId::EraseImage,
            &[&device, &slot],
            &(code, slot),
        )
        .await
    }

    /// Writes one chunk at `offset` within `slot`; the reply is the number
    /// of bytes the device accepted.
    ///
    /// # Errors
    ///
    /// Returns an error when `device` or `slot` is out of range.
    pub async fn load_chunk(
        session: &Session,
        device: DeviceAddress,
        slot: u8,
        offset: u32,
        data: &[u8],
    ) -> Result<Reply<u32>, CommandError> {
        let code = device.validate()?;
        CommandError::check_max("slot", slot, MAX_SLOT_INDEX)?;
        CommandDispatcher::call(
            session,
            CommandId::LoadFirmware,
            &[&device, &slot, &format!("0x{offset:X}"), &data.len()],
            &(code, slot, offset, data.to_vec()),
        )
        .await
    }

    /// Runs the device-side integrity check; [`IMAGE_OK`] means the image
    /// is bootable.
    ///
    /// # Errors
    ///
    /// Returns an error when `device` or `slot` is out of range.
    pub async fn check_image(
        session: &Session,
        device: DeviceAddress,
        slot: u8,
    ) -> Result<Reply<u8>, CommandError> {
        let code = device.validate()?;
        CommandError::check_max("slot", slot, MAX_SLOT_INDEX)?;
        CommandDispatcher::call(
            session,
            CommandId::CheckImage,
            &[&device, &slot],
            &(code, slot),
        )
        .await
    }

    /// Stores the image in `slot` to the EEPROM, starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error when `slot` is out of range.
    pub async fn copy_to_eeprom(
        session: &Session,
        slot: u8,
        start: u32,
    ) -> Result<Status, CommandError> {
        CommandError::check_max("slot", slot, MAX_SLOT_INDEX)?;
        CommandDispatcher::send(
            session,
            CommandId::CopyFirmwareToEeprom,
            &[&slot, &format!("0x{start:X}")],
            &(FLASH_TO_EEPROM, slot, start),
        )
        .await
    }

    /// Programs `slot` from the EEPROM image starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error when `slot` is out of range.
    pub async fn copy_from_eeprom(
        session: &Session,
        slot: u8,
        start: u32,
    ) -> Result<Status, CommandError> {
        CommandError::check_max("slot", slot, MAX_SLOT_INDEX)?;
        CommandDispatcher::send(
            session,
            CommandId::CopyFirmwareFromEeprom,
            &[&slot, &format!("0x{start:X}")],
            &(EEPROM_TO_FLASH, slot, start),
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

    async fn slave_session() -> (SimulatedDevice, Session) {
        let device = SimulatedDevice::slave(MacAddress::new([0x02, 0xEA, 0, 0, 0, 0x04]));
        let session = Session::new(DeviceClass::Slave, Box::new(device.transport("sim")));
        assert!(session.open().await);
        (device, session)
    }

    #[tokio::test]
    async fn active_slot_cannot_be_erased() {
        let (device, session) = slave_session().await;
        session.set_retries(0);

        let status = FirmwareHandler::erase_image(&session, DeviceAddress::Local, 0)
            .await
            .expect("erase should validate");

        assert_eq!(0x04, status.code());
        assert_eq!(vec![0xA5; 16], device.slot_image(0));
    }

    #[tokio::test]
    async fn loaded_chunks_land_at_their_offsets() {
        let (device, session) = slave_session().await;

        for (offset, byte) in [(0u32, 0x11u8), (4, 0x22)] {
            let reply = FirmwareHandler::load_chunk(
                &session,
                DeviceAddress::Local,
                1,
                offset,
                &[byte; 4],
            )
            .await
            .expect("load should validate");
            assert_eq!(Some(4), reply.into_value());
        }

        assert_eq!(
            vec![0x11, 0x11, 0x11, 0x11, 0x22, 0x22, 0x22, 0x22],
            device.slot_image(1)
        );
    }

    #[tokio::test]
    async fn eeprom_round_trip_restores_inactive_slot() {
        let device = SimulatedDevice::slave(MacAddress::new([0x02, 0xEA, 0, 0, 0, 0x04]));
        let transport = device.transport("sim");
        let journal = transport.journal();
        let session = Session::new(DeviceClass::Slave, Box::new(transport));
        assert!(session.open().await);

        FirmwareHandler::copy_to_eeprom(&session, 0, 0)
            .await
            .expect("copy should validate");
        let status = FirmwareHandler::copy_from_eeprom(&session, 1, 0)
            .await
            .expect("copy should validate");

        assert_eq!(Status::Success, status);
        assert_eq!(device.slot_image(0), device.slot_image(1));
        assert_eq!(device.slot_image(0), device.eeprom_image());
        assert_eq!(1, journal.count_for(CommandId::CopyFirmwareToEeprom));
        assert_eq!(1, journal.count_for(CommandId::CopyFirmwareFromEeprom));
    }

    #[tokio::test]
    async fn out_of_range_slot_never_reaches_the_wire() {
        let (_device, session) = slave_session().await;
        assert_matches!(
            FirmwareHandler::check_image(&session, DeviceAddress::Local, 2).await,
            Err(CommandError::OutOfRange { field: "slot", .. })
        );
        assert_matches!(
            FirmwareHandler::active_image(&session, DeviceAddress::Speaker(40)).await,
            Err(CommandError::OutOfRange {
                field: "speaker index",
                ..
            })
        );
    }

    #[test]
    fn local_device_uses_reserved_address() {
        assert_eq!("0xFE", DeviceAddress::Local.to_string());
        assert_eq!(3, DeviceAddress::Speaker(3).code());
    }
}
