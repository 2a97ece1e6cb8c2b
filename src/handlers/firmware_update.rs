use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use crc32fast::hash;
use indicatif::ProgressStyle;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{Span, debug, info, instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::dispatch::{CommandError, Reply};
use super::firmware::{DeviceAddress, FirmwareHandler, IMAGE_OK, MAX_SLOT_INDEX};
use crate::hw::Session;
use crate::protocol::DeviceClass;
use crate::status::Status;

/// Bytes sent per load command.
pub const FIRMWARE_CHUNK_LEN: usize = 128;
const DEFAULT_CHUNK_ATTEMPTS: u32 = 15;
const DEFAULT_PROGRESS_INTERVAL: usize = 4;
const DEFAULT_MASTER_ERASE_SETTLE: Duration = Duration::from_secs(3);
const DEFAULT_ACTIVATION_SETTLE: Duration = Duration::from_secs(5);
/// Status a slot erase returns when the slot is already blank.
const ALREADY_ERASED: u8 = 0x02;

/// Errors that stop an update before it reaches the device.
#[derive(Debug, Error)]
pub enum FirmwareUpdateError {
    #[error("failed to read firmware image `{path}`")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("firmware image is empty")]
    EmptyImage,
    #[error("firmware image of {len} bytes does not fit the 32-bit slot address space")]
    ImageTooLarge { len: usize },
    #[error("chunk length must be between 1 and {max}, got {len}")]
    InvalidChunkLength { len: usize, max: usize },
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Step of the two-slot update sequence.
#[derive(Debug, Clone, Copy, Eq, PartialEq, strum_macros::Display)]
pub enum UpdateStage {
    #[strum(to_string = "identify active slot")]
    IdentifyActiveSlot,
    #[strum(to_string = "erase target slot")]
    EraseTargetSlot,
    #[strum(to_string = "load chunks")]
    LoadChunks,
    #[strum(to_string = "copy from EEPROM")]
    CopyFromEeprom,
    #[strum(to_string = "verify")]
    Verify,
    #[strum(to_string = "activate")]
    Activate,
}

/// How an update ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum UpdateOutcome {
    /// The target slot was verified and activated.
    Done,
    /// The sequence stopped at `stage` with the last status seen there.
    Failed { stage: UpdateStage, status: Status },
}

/// Summary of one update run.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct UpdateReport {
    pub outcome: UpdateOutcome,
    /// Slot the image was written to, once known.
    pub target_slot: Option<u8>,
    pub bytes_loaded: usize,
}

impl UpdateReport {
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.outcome == UpdateOutcome::Done
    }
}

/// Progress tick handed to the caller while chunks are loading.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct UpdateProgress {
    pub bytes_loaded: usize,
    pub total_bytes: usize,
}

/// A raw firmware image, loaded verbatim from offset zero.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FirmwareImage {
    bytes: Vec<u8>,
}

impl FirmwareImage {
    /// Wraps image bytes.
    ///
    /// ```
    /// use summit::FirmwareImage;
    ///
    /// let image = FirmwareImage::new(vec![0u8; 300])?;
    /// assert_eq!(300, image.len());
    /// assert_eq!(3, image.chunk_count(128));
    /// # Ok::<(), summit::FirmwareUpdateError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error for an empty image or one larger than a slot can
    /// address.
    pub fn new(bytes: Vec<u8>) -> Result<Self, FirmwareUpdateError> {
        if bytes.is_empty() {
            return Err(FirmwareUpdateError::EmptyImage);
        }
        if u32::try_from(bytes.len()).is_err() {
            return Err(FirmwareUpdateError::ImageTooLarge { len: bytes.len() });
        }
        Ok(Self { bytes })
    }

    /// Reads an image file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or is empty.
    pub fn load(path: &Path) -> Result<Self, FirmwareUpdateError> {
        let bytes = std::fs::read(path).map_err(|source| FirmwareUpdateError::ReadImage {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(bytes)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; empty images are rejected on construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of load commands needed at `chunk_len` bytes each.
    #[must_use]
    pub fn chunk_count(&self, chunk_len: usize) -> usize {
        self.bytes.len().div_ceil(chunk_len.max(1))
    }

    /// Host-side CRC-32, logged so runs can be matched to image files.
    #[must_use]
    pub fn crc32(&self) -> u32 {
        hash(&self.bytes)
    }
}

/// Where the new image comes from.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FirmwareSource {
    /// Chunks sent from the host.
    Image(FirmwareImage),
    /// An image already stored in the module's EEPROM.
    Eeprom { start_address: u32 },
}

/// Firmware primitives the update sequence drives.
#[async_trait]
pub trait FirmwareTarget: Send + Sync {
    /// Class of the module that executes the commands.
    fn class(&self) -> DeviceClass;

    async fn active_image(&self) -> Result<Reply<u8>, CommandError>;

    async fn erase_image(&self, slot: u8) -> Result<Status, CommandError>;

    /// Writes one chunk and returns the number of bytes accepted.
    async fn load_chunk(&self, slot: u8, offset: u32, data: &[u8])
    -> Result<Reply<u32>, CommandError>;

    async fn check_image(&self, slot: u8) -> Result<Reply<u8>, CommandError>;

    async fn activate(&self, slot: u8) -> Result<Status, CommandError>;

    async fn copy_from_eeprom(&self, slot: u8, start_address: u32) -> Result<Status, CommandError>;
}

/// [`FirmwareTarget`] backed by a live session.
#[derive(Debug, Clone, Copy)]
pub struct SessionFirmwareTarget<'a> {
    session: &'a Session,
    device: DeviceAddress,
}

impl<'a> SessionFirmwareTarget<'a> {
    #[must_use]
    pub fn new(session: &'a Session, device: DeviceAddress) -> Self {
        Self { session, device }
    }
}

#[async_trait]
impl FirmwareTarget for SessionFirmwareTarget<'_> {
    fn class(&self) -> DeviceClass {
        self.session.class()
    }

    async fn active_image(&self) -> Result<Reply<u8>, CommandError> {
        FirmwareHandler::active_image(self.session, self.device).await
    }

    async fn erase_image(&self, slot: u8) -> Result<Status, CommandError> {
        FirmwareHandler::erase_image(self.session, self.device, slot).await
    }

    /// Chunk retries are owned by the updater, so the session retry count
    /// is suspended for the call.
    async fn load_chunk(
        &self,
        slot: u8,
        offset: u32,
        data: &[u8],
    ) -> Result<Reply<u32>, CommandError> {
        let _retries = self.session.scoped_retries(0);
        FirmwareHandler::load_chunk(self.session, self.device, slot, offset, data).await
    }

    async fn check_image(&self, slot: u8) -> Result<Reply<u8>, CommandError> {
        FirmwareHandler::check_image(self.session, self.device, slot).await
    }

    async fn activate(&self, slot: u8) -> Result<Status, CommandError> {
        FirmwareHandler::set_active_image(self.session, self.device, slot).await
    }

    async fn copy_from_eeprom(&self, slot: u8, start_address: u32) -> Result<Status, CommandError> {
        FirmwareHandler::copy_from_eeprom(self.session, slot, start_address).await
    }
}

/// Drives the identify, erase, load, verify and activate sequence.
///
/// The active slot is only changed by the final step, so any failure
/// leaves the running image in place.
#[derive(Debug, Clone, Eq, PartialEq, Builder)]
pub struct FirmwareUpdater {
    #[builder(default = FIRMWARE_CHUNK_LEN)]
    chunk_len: usize,
    #[builder(default = DEFAULT_CHUNK_ATTEMPTS)]
    chunk_attempts: u32,
    #[builder(default = DEFAULT_PROGRESS_INTERVAL)]
    progress_interval: usize,
    #[builder(default = DEFAULT_MASTER_ERASE_SETTLE)]
    master_erase_settle: Duration,
    #[builder(default = DEFAULT_ACTIVATION_SETTLE)]
    activation_settle: Duration,
}

impl Default for FirmwareUpdater {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct Run {
    target_slot: Option<u8>,
    bytes_loaded: usize,
}

impl Run {
    fn failed(self, stage: UpdateStage, status: Status) -> UpdateReport {
        warn!(%stage, %status, "firmware update failed");
        UpdateReport {
            outcome: UpdateOutcome::Failed { stage, status },
            target_slot: self.target_slot,
            bytes_loaded: self.bytes_loaded,
        }
    }
}

impl FirmwareUpdater {
    /// Updates the inactive slot from `source` and activates it.
    ///
    /// ```
    /// # async fn demo(session: summit::Session) -> Result<(), summit::FirmwareUpdateError> {
    /// use summit::{
    ///     DeviceAddress, FirmwareImage, FirmwareSource, FirmwareUpdater, SessionFirmwareTarget,
    /// };
    ///
    /// let image = FirmwareImage::new(vec![0u8; 300])?;
    /// let target = SessionFirmwareTarget::new(&session, DeviceAddress::Local);
    /// let report = FirmwareUpdater::default()
    ///     .run(&target, &FirmwareSource::Image(image), |_progress| {})
    ///     .await?;
    /// println!("done: {}", report.is_done());
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid chunk length or when a primitive
    /// fails local validation. Device and link failures are reported in the
    /// returned [`UpdateReport`].
    #[instrument(skip_all, level = "info", fields(class = %target.class()))]
    pub async fn run<T, F>(
        &self,
        target: &T,
        source: &FirmwareSource,
        mut on_progress: F,
    ) -> Result<UpdateReport, FirmwareUpdateError>
    where
        T: FirmwareTarget + ?Sized,
        F: FnMut(UpdateProgress) + Send,
    {
        if self.chunk_len == 0 || self.chunk_len > FIRMWARE_CHUNK_LEN {
            return Err(FirmwareUpdateError::InvalidChunkLength {
                len: self.chunk_len,
                max: FIRMWARE_CHUNK_LEN,
            });
        }
        let mut run = Run {
            target_slot: None,
            bytes_loaded: 0,
        };

        let (status, active) = target.active_image().await?.into_parts();
        let active = match active {
            Some(slot) if status.is_success() && slot <= MAX_SLOT_INDEX => slot,
            _ => return Ok(run.failed(UpdateStage::IdentifyActiveSlot, status)),
        };
        let slot = MAX_SLOT_INDEX - active;
        run.target_slot = Some(slot);
        info!(active, target = slot, "updating inactive firmware slot");

        let status = target.erase_image(slot).await?;
        if !status.is_success() && status.code() != ALREADY_ERASED {
            return Ok(run.failed(UpdateStage::EraseTargetSlot, status));
        }
        if target.class() == DeviceClass::Master {
            sleep(self.master_erase_settle).await;
        }

        match source {
            FirmwareSource::Image(image) => {
                info!(bytes = image.len(), crc32 = format_args!("0x{:08X}", image.crc32()), "loading image");
                if let Err((stage, status)) =
                    self.load_image(target, slot, image, &mut run, &mut on_progress).await?
                {
                    return Ok(run.failed(stage, status));
                }
            }
            FirmwareSource::Eeprom { start_address } => {
                let status = target.copy_from_eeprom(slot, *start_address).await?;
                if !status.is_success() {
                    return Ok(run.failed(UpdateStage::CopyFromEeprom, status));
                }
            }
        }

        let (status, check) = target.check_image(slot).await?.into_parts();
        if check != Some(IMAGE_OK) {
            let status = match check {
                Some(code) if status.is_success() => Status::from_code(code),
                _ => status,
            };
            return Ok(run.failed(UpdateStage::Verify, status));
        }

        let status = target.activate(slot).await?;
        if !status.is_success() {
            return Ok(run.failed(UpdateStage::Activate, status));
        }
        sleep(self.activation_settle).await;
        info!(slot, "firmware update complete");

        Ok(UpdateReport {
            outcome: UpdateOutcome::Done,
            target_slot: run.target_slot,
            bytes_loaded: run.bytes_loaded,
        })
    }

    async fn load_image<T, F>(
        &self,
        target: &T,
        slot: u8,
        image: &FirmwareImage,
        run: &mut Run,
        on_progress: &mut F,
    ) -> Result<Result<(), (UpdateStage, Status)>, FirmwareUpdateError>
    where
        T: FirmwareTarget + ?Sized,
        F: FnMut(UpdateProgress) + Send,
    {
        let total = image.len();
        let span = Span::current();
        span.pb_set_style(&load_progress_style());
        span.pb_set_length(u64::try_from(total).unwrap_or(u64::MAX));
        span.pb_set_position(0);

        let mut chunks = 0usize;
        while run.bytes_loaded < total {
            let offset = run.bytes_loaded;
            let chunk = &image.bytes()[offset..(offset + self.chunk_len).min(total)];
            let address = u32::try_from(offset)
                .map_err(|_error| FirmwareUpdateError::ImageTooLarge { len: total })?;

            let mut last_status = Status::Success;
            let mut accepted = 0usize;
            for attempt in 1..=self.chunk_attempts {
                let (status, count) = target.load_chunk(slot, address, chunk).await?.into_parts();
                let count = count.map_or(0, |count| usize::try_from(count).unwrap_or(usize::MAX));
                if status.is_success() && count > 0 {
                    accepted = count.min(chunk.len());
                    break;
                }
                debug!(attempt, offset, %status, "chunk not accepted");
                last_status = status;
            }
            if accepted == 0 {
                return Ok(Err((UpdateStage::LoadChunks, last_status)));
            }

            run.bytes_loaded += accepted;
            chunks += 1;
            if chunks % self.progress_interval.max(1) == 0 || run.bytes_loaded == total {
                span.pb_set_position(u64::try_from(run.bytes_loaded).unwrap_or(u64::MAX));
                on_progress(UpdateProgress {
                    bytes_loaded: run.bytes_loaded,
                    total_bytes: total,
                });
            }
        }
        Ok(Ok(()))
    }

    /// Stores the running image in the EEPROM so it can be restored later
    /// with [`FirmwareSource::Eeprom`].
    ///
    /// # Errors
    ///
    /// Returns an error when a primitive fails local validation.
    #[instrument(skip_all, level = "info", fields(session = %session.label()))]
    pub async fn copy_active_to_eeprom(
        &self,
        session: &Session,
        start_address: u32,
    ) -> Result<Status, FirmwareUpdateError> {
        let (status, active) = FirmwareHandler::active_image(session, DeviceAddress::Local)
            .await?
            .into_parts();
        let Some(active) = active.filter(|_slot| status.is_success()) else {
            return Ok(status);
        };
        Ok(FirmwareHandler::copy_to_eeprom(session, active, start_address).await?)
    }
}

fn load_progress_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan.bold} loading {wide_bar:.cyan/blue} {bytes}/{total_bytes}")
        .unwrap_or_else(|_error| ProgressStyle::default_bar())
}
