use std::io;

use anyhow::Result;
use serde::Serialize;
use tracing::instrument;

use crate::app::Workbench;
use crate::cli::{OutputFormat, write_json_line};
use crate::handlers::MacAddress;
use crate::hw::{DeviceDirectory, MasterDevice, SlaveIdentity};
use crate::terminal::TerminalClient;

use super::ui::{DeviceListView, Painter, Spinner};

#[derive(Serialize)]
struct MasterSummary {
    port: String,
    mac: MacAddress,
    firmware: String,
    module_id: u16,
    zone: Option<u8>,
}

#[derive(Serialize)]
struct SlaveSummary<'a> {
    index: usize,
    port: &'a str,
    identity: Option<&'a SlaveIdentity>,
}

#[derive(Serialize)]
struct DeviceList<'a> {
    master: Option<MasterSummary>,
    slaves: Vec<SlaveSummary<'a>>,
    topology_match: bool,
    missing: Vec<MacAddress>,
    unexpected: Vec<MacAddress>,
}

/// Executes the `devices` command.
#[instrument(skip(workbench, out, terminal_client), level = "info", fields(?output_format))]
pub(crate) async fn run<W>(
    workbench: &Workbench,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let spinner = Spinner::new(
        output_format == OutputFormat::Pretty && terminal_client.stderr_is_terminal(),
    );
    let (master, mut directory) = spinner
        .run("Connecting to the master", |stage| async move {
            let master = if workbench.has_master() {
                Some(workbench.connect_master().await?)
            } else {
                None
            };
            stage.set("Probing slave ports");
            let directory = workbench.probe_slaves().await?;
            anyhow::Ok((master, directory))
        })
        .await?;
    let topology = workbench
        .config()
        .topology
        .validate(master.as_ref().map(MasterDevice::mac), &directory);

    let written = match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            let view = DeviceListView::new(master.as_ref(), &directory, &painter)
                .with_topology(&topology);
            writeln!(out, "{view}").map_err(anyhow::Error::from)
        }
        OutputFormat::Json => write_json_line(
            out,
            &DeviceList {
                master: master.as_ref().map(summarise_master),
                slaves: summarise_slaves(&directory),
                topology_match: topology.is_match(),
                missing: topology.missing.clone(),
                unexpected: topology.unexpected.clone(),
            },
        ),
    };

    if let Some(master) = &master {
        master.close().await;
    }
    directory.close_all().await;
    written
}

fn summarise_master(master: &MasterDevice) -> MasterSummary {
    MasterSummary {
        port: master.session().label().to_string(),
        mac: master.mac(),
        firmware: master.firmware_version().to_string(),
        module_id: master.module_id(),
        zone: master.zone(),
    }
}

fn summarise_slaves(directory: &DeviceDirectory) -> Vec<SlaveSummary<'_>> {
    directory
        .iter()
        .enumerate()
        .map(|(index, slave)| SlaveSummary {
            index,
            port: slave.label(),
            identity: slave.identity(),
        })
        .collect()
}
