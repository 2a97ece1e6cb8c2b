use std::io;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, instrument};

use crate::app::{ConnectedModule, Workbench};
use crate::cli::{DumpArgs, MfgLoadArgs, OutputFormat, write_json_line};
use crate::error::CliConfigError;
use crate::handlers::{FlashHandler, FlashSection, MacAddress};
use crate::mfg::{MfgFile, dump_file_name};

#[derive(Serialize)]
struct DumpResult {
    section: String,
    path: String,
    bytes: usize,
}

#[derive(Serialize)]
struct MfgLoadResult {
    mac: MacAddress,
    forced: bool,
}

fn module_mac(module: &ConnectedModule) -> Result<MacAddress> {
    match module.mac() {
        Some(mac) => Ok(mac),
        None => bail!(CliConfigError::UnknownIdentity {
            label: module.session().label().to_string(),
        }),
    }
}

/// Executes the `dump` command.
#[instrument(skip(workbench, out), level = "info", fields(section = %args.section, target = %args.target.target))]
pub(crate) async fn dump<W>(
    workbench: &Workbench,
    args: &DumpArgs,
    out: &mut W,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let module = workbench.connect(args.target.target).await?;
    let result = dump_section(&module, args).await;
    module.close().await;
    let result = result?;

    match output_format {
        OutputFormat::Pretty => writeln!(
            out,
            "Wrote {} {} bytes to {}",
            result.bytes, result.section, result.path
        )?,
        OutputFormat::Json => write_json_line(out, &result)?,
    }
    Ok(())
}

async fn dump_section(module: &ConnectedModule, args: &DumpArgs) -> Result<DumpResult> {
    let session = module.session();
    let mac = module_mac(module)?;
    let path = args
        .dir
        .join(dump_file_name(args.prefix.as_deref(), mac, args.section));
    if path.exists() && !args.overwrite {
        bail!(CliConfigError::FileExists { path });
    }

    let (status, data) = FlashHandler::read_section(session, args.section)
        .await?
        .into_parts();
    let Some(data) = data else {
        bail!(
            "{}",
            status.report(session.class(), &format!("dump({})", args.section))
        );
    };
    let bytes = data.len();
    match args.section {
        FlashSection::Manufacturing => MfgFile::from_section(data)?.save(&path)?,
        FlashSection::Coefficients | FlashSection::System => std::fs::write(&path, data)?,
    }
    info!(path = %path.display(), bytes, "section dumped");
    Ok(DumpResult {
        section: args.section.to_string(),
        path: path.display().to_string(),
        bytes,
    })
}

/// Executes the `mfg-load` command.
#[instrument(skip(workbench, out), level = "info", fields(file = %args.file.display(), force = args.force, target = %args.target.target))]
pub(crate) async fn mfg_load<W>(
    workbench: &Workbench,
    args: &MfgLoadArgs,
    out: &mut W,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let file = MfgFile::load(&args.file)?;
    let module = workbench.connect(args.target.target).await?;
    let result = load_section(&module, &file, args.force).await;
    module.close().await;
    let mac = result?;

    match output_format {
        OutputFormat::Pretty => writeln!(out, "Loaded manufacturing data for {mac}")?,
        OutputFormat::Json => write_json_line(
            out,
            &MfgLoadResult {
                mac,
                forced: file.mac() != mac,
            },
        )?,
    }
    Ok(())
}

async fn load_section(module: &ConnectedModule, file: &MfgFile, force: bool) -> Result<MacAddress> {
    let session = module.session();
    let mac = module_mac(module)?;
    file.ensure_matches(mac, force)?;
    let status =
        FlashHandler::write_section(session, FlashSection::Manufacturing, file.section()).await?;
    if !status.is_success() {
        bail!("{}", status.report(session.class(), "mfg-load"));
    }
    Ok(mac)
}
