use std::time::Duration;

use tracing::{debug, info, instrument};

use super::dispatch::{CommandDispatcher, CommandError, Reply};
use crate::hw::Session;
use crate::protocol::CommandId;
use crate::status::{LinkFault, Status};

/// Register holding the Summit identity value.
pub const IDENTITY_REGISTER: u32 = 0x0040_3024;
/// Value every Summit module reports from [`IDENTITY_REGISTER`].
pub const IDENTITY_MAGIC: u16 = 0xEA02;
/// Register holding the radio ASIC device ID.
pub const DEVICE_ID_REGISTER: u32 = 0x0040_0008;

const PIO_REGISTER: u32 = 0x0040_0040;
const PIO_RESET: u16 = 0x8000;
const PIO_CLEAR: u16 = 0x0000;
const NIOS_RESET_REGISTER: u32 = 0x0040_0064;
const NIOS_RESET: u16 = 0x0100;
const REBOOT_TIMEOUT: Duration = Duration::from_secs(3);

/// Handler for raw register access.
pub struct RegisterHandler;

impl RegisterHandler {
    /// Reads one 16-bit register.
    ///
    /// ```
    /// # async fn demo(session: summit::Session) -> Result<(), summit::CommandError> {
    /// use summit::RegisterHandler;
    ///
    /// let (status, value) = RegisterHandler::read(&session, 0x0040_0008).await?.into_parts();
    /// println!("{status}: {value:?}");
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn read(session: &Session, address: u32) -> Result<Reply<u16>, CommandError> {
        CommandDispatcher::call(
            session,
            CommandId::ReadRegister,
            &[&format!("0x{address:X}")],
            &address,
        )
        .await
    }

    /// Writes one 16-bit register.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn write(session: &Session, address: u32, value: u16) -> Result<Status, CommandError> {
        CommandDispatcher::send(
            session,
            CommandId::WriteRegister,
            &[
                &format!("0x{address:X}"),
                &format!("0x{value:04X}"),
            ],
            &(address, value),
        )
        .await
    }

    /// Reads the radio ASIC device ID.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    pub async fn device_id(session: &Session) -> Result<Reply<u16>, CommandError> {
        Self::read(session, DEVICE_ID_REGISTER).await
    }

    /// Checks whether the module behind `session` speaks the Summit protocol.
    ///
    /// A single attempt is made with `timeout`, so unrelated devices sharing
    /// a bus are not flooded with retries.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    #[instrument(skip(session), level = "debug", fields(session = %session.label()))]
    pub async fn identify(session: &Session, timeout: Duration) -> Result<bool, CommandError> {
        let _retries = session.scoped_retries(0);
        let _timeout = session.scoped_timeout(timeout);
        let reply = Self::read(session, IDENTITY_REGISTER).await?;
        let identified = reply.value() == Some(&IDENTITY_MAGIC);
        debug!(status = %reply.status(), identified, "identity probe finished");
        Ok(identified)
    }

    /// Resets a slave module through its ASIC registers.
    ///
    /// The final write resets the CPU mid-exchange, so its reply is expected
    /// to stop inside the header. Returns whether the sequence behaved that
    /// way; any other outcome of the final write, a timeout included, counts
    /// as a failed reset.
    ///
    /// # Errors
    ///
    /// Returns an error only for local validation failures.
    #[instrument(skip(session), level = "info", fields(session = %session.label()))]
    pub async fn reboot_slave(session: &Session) -> Result<bool, CommandError> {
        let _timeout = session.scoped_timeout(REBOOT_TIMEOUT);
        let pio_reset = Self::write(session, PIO_REGISTER, PIO_RESET).await?;
        let pio_clear = Self::write(session, PIO_REGISTER, PIO_CLEAR).await?;
        let nios_reset = {
            let _retries = session.scoped_retries(0);
            Self::write(session, NIOS_RESET_REGISTER, NIOS_RESET).await?
        };

        let rebooted = pio_reset.is_success()
            && pio_clear.is_success()
            && nios_reset == Status::Link(LinkFault::HeaderTruncated);
        if rebooted {
            info!("slave reset issued");
        } else {
            debug!(
                %pio_reset,
                %pio_clear,
                %nios_reset,
                "slave reset sequence did not behave as expected"
            );
        }
        Ok(rebooted)
    }
}
