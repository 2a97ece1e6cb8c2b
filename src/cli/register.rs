use std::io;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::instrument;

use crate::app::Workbench;
use crate::cli::{OutputFormat, ReadArgs, WriteArgs, write_json_line};
use crate::handlers::RegisterHandler;

#[derive(Serialize)]
struct RegisterValue {
    address: u32,
    value: u16,
}

/// Executes the `rd` command.
#[instrument(skip(workbench, out), level = "info", fields(address = args.address, target = %args.target.target))]
pub(crate) async fn read<W>(
    workbench: &Workbench,
    args: &ReadArgs,
    out: &mut W,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let module = workbench.connect(args.target.target).await?;
    let session = module.session();
    let reply = RegisterHandler::read(session, args.address).await;
    module.close().await;

    let (status, value) = reply?.into_parts();
    let Some(value) = value else {
        bail!(
            "{}",
            status.report(session.class(), &format!("rd(0x{:X})", args.address))
        );
    };
    match output_format {
        OutputFormat::Pretty => writeln!(out, "0x{value:04X}")?,
        OutputFormat::Json => write_json_line(
            out,
            &RegisterValue {
                address: args.address,
                value,
            },
        )?,
    }
    Ok(())
}

/// Executes the `wr` command.
#[instrument(skip(workbench, out), level = "info", fields(address = args.address, value = args.value, target = %args.target.target))]
pub(crate) async fn write<W>(
    workbench: &Workbench,
    args: &WriteArgs,
    out: &mut W,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let module = workbench.connect(args.target.target).await?;
    let session = module.session();
    let status = RegisterHandler::write(session, args.address, args.value).await;
    module.close().await;

    let status = status?;
    if !status.is_success() {
        bail!(
            "{}",
            status.report(
                session.class(),
                &format!("wr(0x{:X}, 0x{:04X})", args.address, args.value)
            )
        );
    }
    match output_format {
        OutputFormat::Pretty => writeln!(out, "ok")?,
        OutputFormat::Json => write_json_line(
            out,
            &RegisterValue {
                address: args.address,
                value: args.value,
            },
        )?,
    }
    Ok(())
}
