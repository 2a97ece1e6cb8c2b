use std::io;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::app::Workbench;
use crate::cli::{FwLoadArgs, OutputFormat, write_json_line};
use crate::handlers::{
    DeviceAddress, FirmwareImage, FirmwareSource, FirmwareUpdater, SessionFirmwareTarget,
    UpdateOutcome,
};

#[derive(Serialize)]
struct FirmwareLoadResult {
    target_slot: Option<u8>,
    bytes_loaded: usize,
    crc32: String,
}

/// Executes the `fw-load` command.
#[instrument(skip(workbench, out), level = "info", fields(file = %args.file.display(), target = %args.target.target))]
pub(crate) async fn run<W>(
    workbench: &Workbench,
    args: &FwLoadArgs,
    out: &mut W,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let image = FirmwareImage::load(&args.file)?;
    let crc32 = format!("0x{:08X}", image.crc32());
    let device = args.slave.map_or(DeviceAddress::Local, DeviceAddress::Speaker);

    let module = workbench.connect(args.target.target).await?;
    let target = SessionFirmwareTarget::new(module.session(), device);
    let report = FirmwareUpdater::default()
        .run(&target, &FirmwareSource::Image(image), |progress| {
            debug!(
                bytes_loaded = progress.bytes_loaded,
                total_bytes = progress.total_bytes,
                "firmware load progress"
            );
        })
        .await;
    module.close().await;

    let report = report?;
    if let UpdateOutcome::Failed { stage, status } = report.outcome {
        bail!(
            "{}",
            status.report(module.session().class(), &format!("fw-load ({stage})"))
        );
    }
    match output_format {
        OutputFormat::Pretty => {
            let slot = report
                .target_slot
                .map_or_else(|| "?".to_string(), |slot| slot.to_string());
            writeln!(
                out,
                "Loaded {} bytes into slot {slot} (crc32 {crc32})",
                report.bytes_loaded
            )?;
        }
        OutputFormat::Json => write_json_line(
            out,
            &FirmwareLoadResult {
                target_slot: report.target_slot,
                bytes_loaded: report.bytes_loaded,
                crc32,
            },
        )?,
    }
    Ok(())
}
