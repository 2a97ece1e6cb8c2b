use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::dispatch::{CommandDispatcher, CommandError, Reply};
use crate::hw::Session;
use crate::protocol::{CommandId, DeviceClass};
use crate::status::Status;

const MAX_CHUNK: u16 = 128;

/// Largest block moved by one flash read or write command.
pub const FLASH_CHUNK_LEN: usize = MAX_CHUNK as usize;
/// Blind wait after a sector erase; the chip does not report completion.
pub const SECTOR_ERASE_SETTLE: Duration = Duration::from_secs(3);

const WHOLE_CHIP: u8 = 0xFF;

/// What a flash erase command clears.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FlashErase {
    /// One 64 KiB sector.
    Sector(u8),
    /// The entire chip, firmware included.
    WholeChip,
}

impl FlashErase {
    const fn code(self) -> u8 {
        match self {
            Self::Sector(sector) => sector,
            Self::WholeChip => WHOLE_CHIP,
        }
    }
}

/// A fixed region of module flash holding persistent data.
#[derive(Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display, strum_macros::EnumString)]
pub enum FlashSection {
    /// Manufacturing data: MAC, serial number, calibration.
    #[strum(to_string = "mfg")]
    Manufacturing,
    /// Speaker equalisation coefficients.
    #[strum(to_string = "coef")]
    Coefficients,
    /// Master system data.
    #[strum(to_string = "system")]
    System,
}

impl FlashSection {
    /// First byte of the section.
    #[must_use]
    pub const fn address(self) -> u32 {
        match self {
            Self::Manufacturing => 0x000C_0000,
            Self::Coefficients => 0x000F_0000,
            Self::System => 0x0009_0000,
        }
    }

    /// Sector erased before the section is rewritten.
    #[must_use]
    pub const fn sector(self) -> u8 {
        match self {
            Self::Manufacturing => 0x0C,
            Self::Coefficients => 0x0F,
            Self::System => 0x09,
        }
    }

    /// Exact section length.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Manufacturing => 128,
            Self::Coefficients => 4096,
            Self::System => 0xFFFF,
        }
    }

    /// Whether modules of `class` keep this section.
    #[must_use]
    pub const fn exists_on(self, class: DeviceClass) -> bool {
        match self {
            Self::Manufacturing => true,
            Self::Coefficients => matches!(class, DeviceClass::Slave),
            Self::System => matches!(class, DeviceClass::Master),
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Manufacturing => "manufacturing",
            Self::Coefficients => "coefficient",
            Self::System => "system",
        }
    }

    fn check_class(self, class: DeviceClass) -> Result<(), CommandError> {
        if self.exists_on(class) {
            Ok(())
        } else {
            Err(CommandError::SectionUnavailable {
                section: self.label(),
                class,
            })
        }
    }
}

/// Handler for raw flash access and the persistent sections built on it.
pub struct FlashHandler;

impl FlashHandler {
    /// Reads up to [`FLASH_CHUNK_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when `len` exceeds [`FLASH_CHUNK_LEN`].
    pub async fn read(
        session: &Session,
        address: u32,
        len: u16,
    ) -> Result<Reply<Vec<u8>>, CommandError> {
        CommandError::check_max("flash read length", len, MAX_CHUNK)?;
        let reply: Reply<Vec<u8>> = CommandDispatcher::call(
            session,
            CommandId::ReadFlash,
            &[&format!("0x{address:06X}"), &len],
            &(address, len),
        )
        .await?;
        if reply.value().is_some_and(|bytes| bytes.len() != usize::from(len)) {
            debug!(expected = len, "flash read returned the wrong number of bytes");
            let fault = session.medium().await.malformed_fault();
            return Ok(Reply::failed(Status::Link(fault)));
        }
        Ok(reply)
    }

    /// Writes up to [`FLASH_CHUNK_LEN`] bytes; the reply is the count the
    /// device stored.
    ///
    /// A stored count that differs from `data.len()` fails the reply with the
    /// medium's malformed-packet fault, as a short read does.
    ///
    /// # Errors
    ///
    /// Returns an error when `data` is longer than [`FLASH_CHUNK_LEN`].
    pub async fn write(
        session: &Session,
        address: u32,
        data: &[u8],
    ) -> Result<Reply<u16>, CommandError> {
        if data.len() > FLASH_CHUNK_LEN {
            return Err(CommandError::PayloadTooLarge {
                len: data.len(),
                max: FLASH_CHUNK_LEN,
            });
        }
        let reply: Reply<u16> = CommandDispatcher::call(
            session,
            CommandId::WriteFlash,
            &[&format!("0x{address:06X}"), &data.len()],
            &(address, data.to_vec()),
        )
        .await?;
        let short = reply
            .value()
            .copied()
            .filter(|&written| usize::from(written) != data.len());
        if let Some(written) = short {
            warn!(
                address = format_args!("0x{address:06X}"),
                expected = data.len(),
                written,
                "flash write stored the wrong number of bytes"
            );
            let fault = session.medium().await.malformed_fault();
            return Ok(Reply::failed(Status::Link(fault)));
        }
        Ok(reply)
    }

    /// Erases one sector or the whole chip. A whole-chip erase is attempted
    /// once.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    #[instrument(skip(session), level = "info", fields(session = %session.label()))]
    pub async fn erase(session: &Session, erase: FlashErase) -> Result<Status, CommandError> {
        let code = erase.code();
        let _retries =
            matches!(erase, FlashErase::WholeChip).then(|| session.scoped_retries(0));
        CommandDispatcher::send(
            session,
            CommandId::EraseFlash,
            &[&format!("0x{code:02X}")],
            &code,
        )
        .await
    }

    /// Reads a whole section in [`FLASH_CHUNK_LEN`] pieces.
    ///
    /// ```
    /// # async fn demo(session: summit::Session) -> Result<(), summit::CommandError> {
    /// use summit::{FlashHandler, FlashSection};
    ///
    /// let (status, data) = FlashHandler::read_section(&session, FlashSection::Manufacturing)
    ///     .await?
    ///     .into_parts();
    /// println!("{status}: {} bytes", data.map_or(0, |data| data.len()));
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the section does not exist on this device class.
    #[instrument(skip(session), level = "debug", fields(session = %session.label(), %section))]
    pub async fn read_section(
        session: &Session,
        section: FlashSection,
    ) -> Result<Reply<Vec<u8>>, CommandError> {
        section.check_class(session.class())?;
        let mut data = Vec::with_capacity(section.size());
        for (address, len) in chunks(section) {
            let reply = Self::read(session, address, len).await?;
            match reply.into_parts() {
                (Status::Success, Some(bytes)) => data.extend(bytes),
                (status, _) => return Ok(Reply::failed(status)),
            }
        }
        Ok(Reply::new(Status::Success, Some(data)))
    }

    /// Replaces a section: erase its sector, wait for the erase to finish,
    /// then write it back in [`FLASH_CHUNK_LEN`] pieces.
    ///
    /// # Errors
    ///
    /// Returns an error before any I/O when the section does not exist on
    /// this device class or `data` is not exactly the section length.
    #[instrument(skip(session, data), level = "info", fields(session = %session.label(), %section))]
    pub async fn write_section(
        session: &Session,
        section: FlashSection,
        data: &[u8],
    ) -> Result<Status, CommandError> {
        section.check_class(session.class())?;
        if data.len() != section.size() {
            return Err(CommandError::SectionLength {
                section: section.label(),
                expected: section.size(),
                actual: data.len(),
            });
        }

        let status = Self::erase_section(session, section).await?;
        if !status.is_success() {
            return Ok(status);
        }
        for ((address, _len), chunk) in chunks(section).zip(data.chunks(FLASH_CHUNK_LEN)) {
            let reply = Self::write(session, address, chunk).await?;
            if !reply.is_success() {
                return Ok(reply.status());
            }
        }
        info!(bytes = data.len(), "flash section written");
        Ok(Status::Success)
    }

    /// Erases the sector behind a section and waits for it to settle.
    ///
    /// # Errors
    ///
    /// Returns an error when the section does not exist on this device class.
    pub async fn erase_section(
        session: &Session,
        section: FlashSection,
    ) -> Result<Status, CommandError> {
        section.check_class(session.class())?;
        let status = Self::erase(session, FlashErase::Sector(section.sector())).await?;
        if status.is_success() {
            sleep(SECTOR_ERASE_SETTLE).await;
        }
        Ok(status)
    }
}

fn chunks(section: FlashSection) -> impl Iterator<Item = (u32, u16)> {
    let len = section.size();
    (0..len).step_by(FLASH_CHUNK_LEN).map(move |offset| {
        let size = FLASH_CHUNK_LEN.min(len - offset);
        let address = section.address() + u32::try_from(offset).unwrap_or(u32::MAX);
        (address, u16::try_from(size).unwrap_or(u16::MAX))
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::handlers::{Frame, MacAddress, encode_payload};
    use crate::hw::{FakeReply, FakeResponder, FakeTransport, SimulatedDevice};
    use crate::status::{LinkFault, SUCCESS_CODE};

    const MAC: MacAddress = MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, 0x09]);

    async fn session_for(device: &SimulatedDevice, class: DeviceClass) -> Session {
        let transport = device.transport("sim");
        let session = Session::new(class, Box::new(transport));
        assert!(session.open().await);
        session
    }

    #[test]
    fn system_section_ends_with_a_short_chunk() {
        let pieces: Vec<_> = chunks(FlashSection::System).collect();
        assert_eq!(512, pieces.len());
        assert_eq!(Some(&(0x0009_FF80, 127)), pieces.last());
    }

    #[tokio::test(start_paused = true)]
    async fn written_section_reads_back() {
        let device = SimulatedDevice::slave(MAC);
        let session = session_for(&device, DeviceClass::Slave).await;
        let data: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        let status = FlashHandler::write_section(&session, FlashSection::Coefficients, &data)
            .await
            .expect("section write should validate");
        let read = FlashHandler::read_section(&session, FlashSection::Coefficients)
            .await
            .expect("section read should validate");

        assert_eq!(Status::Success, status);
        assert_eq!(Some(&data), read.value());
        assert_eq!(data, device.flash(0x000F_0000, 4096));
    }

    #[tokio::test(start_paused = true)]
    async fn short_write_stops_the_section_write() {
        let device = SimulatedDevice::slave(MAC);
        let mut inner = device.clone();
        let mut writes = 0;
        let transport = FakeTransport::new("sim", move |request: &Frame| {
            let reply = inner.respond(request);
            if request.opcode() != CommandId::WriteFlash.metadata().opcode() {
                return reply;
            }
            writes += 1;
            if writes == 3 {
                return FakeReply::Frame(Frame::response_to(
                    request,
                    SUCCESS_CODE,
                    encode_payload(&127u16),
                ));
            }
            reply
        });
        let journal = transport.journal();
        let session = Session::new(DeviceClass::Slave, Box::new(transport));
        assert!(session.open().await);

        let status =
            FlashHandler::write_section(&session, FlashSection::Coefficients, &[0x5A; 4096])
                .await
                .expect("section write should validate");

        assert_eq!(Status::Link(LinkFault::MalformedPacket), status);
        assert_eq!(3, journal.count_for(CommandId::WriteFlash));
    }

    #[tokio::test]
    async fn wrong_section_length_is_rejected_before_erasing() {
        let device = SimulatedDevice::slave(MAC);
        let transport = device.transport("sim");
        let journal = transport.journal();
        let session = Session::new(DeviceClass::Slave, Box::new(transport));
        assert!(session.open().await);

        assert_matches!(
            FlashHandler::write_section(&session, FlashSection::Manufacturing, &[0; 64]).await,
            Err(CommandError::SectionLength {
                expected: 128,
                actual: 64,
                ..
            })
        );
        assert_eq!(0, journal.frame_count());
    }

    #[tokio::test]
    async fn coefficients_are_not_kept_on_masters() {
        let device = SimulatedDevice::master(MAC);
        let session = session_for(&device, DeviceClass::Master).await;

        assert_matches!(
            FlashHandler::read_section(&session, FlashSection::Coefficients).await,
            Err(CommandError::SectionUnavailable {
                class: DeviceClass::Master,
                ..
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sector_erase_only_clears_its_sector() {
        let device = SimulatedDevice::slave(MAC);
        let session = session_for(&device, DeviceClass::Slave).await;
        FlashHandler::write(&session, 0x000C_0000, &[0x11; 4])
            .await
            .expect("write should validate");
        FlashHandler::write(&session, 0x000F_0000, &[0x22; 4])
            .await
            .expect("write should validate");

        FlashHandler::erase_section(&session, FlashSection::Manufacturing)
            .await
            .expect("erase should validate");

        assert_eq!(vec![0xFF; 4], device.flash(0x000C_0000, 4));
        assert_eq!(vec![0x22; 4], device.flash(0x000F_0000, 4));
    }

    #[tokio::test]
    async fn oversized_chunk_is_rejected() {
        let device = SimulatedDevice::slave(MAC);
        let session = session_for(&device, DeviceClass::Slave).await;
        assert_matches!(
            FlashHandler::read(&session, 0, 129).await,
            Err(CommandError::OutOfRange { max: 128, .. })
        );
    }
}
