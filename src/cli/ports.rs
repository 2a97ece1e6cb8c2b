use std::io;

use anyhow::Result;
use serde::Serialize;
use tracing::instrument;

use crate::app::Workbench;
use crate::cli::{OutputFormat, write_json_line};

#[derive(Serialize)]
struct PortList {
    ports: Vec<String>,
}

/// Executes the `ports` command.
#[instrument(skip(workbench, out), level = "info", fields(?output_format))]
pub(crate) fn run<W>(workbench: &Workbench, out: &mut W, output_format: OutputFormat) -> Result<()>
where
    W: io::Write,
{
    let ports = workbench.available_ports();
    match output_format {
        OutputFormat::Pretty => {
            if ports.is_empty() {
                writeln!(out, "No serial ports found")?;
            }
            for port in &ports {
                writeln!(out, "{port}")?;
            }
        }
        OutputFormat::Json => write_json_line(out, &PortList { ports })?,
    }
    Ok(())
}
