use std::fmt::{self, Display, Formatter};

use crate::config::TopologyReport;
use crate::hw::{DeviceDirectory, MasterDevice, SlaveDevice};

use super::painter::Painter;
use super::table::Table;

const UNKNOWN: &str = "<unknown>";

/// Renders the master and the probed slaves as one table.
pub(crate) struct DeviceListView<'a> {
    master: Option<&'a MasterDevice>,
    directory: &'a DeviceDirectory,
    topology: Option<&'a TopologyReport>,
    painter: &'a Painter,
}

impl<'a> DeviceListView<'a> {
    pub(crate) fn new(
        master: Option<&'a MasterDevice>,
        directory: &'a DeviceDirectory,
        painter: &'a Painter,
    ) -> Self {
        Self {
            master,
            directory,
            topology: None,
            painter,
        }
    }

    pub(crate) fn with_topology(mut self, topology: &'a TopologyReport) -> Self {
        self.topology = Some(topology);
        self
    }

    fn master_row(&self, master: &MasterDevice) -> Vec<String> {
        vec![
            self.painter.role("master"),
            master.session().label().to_string(),
            self.painter.mac(&master.mac().to_string()),
            master.firmware_version().to_string(),
            format!("0x{:04X}", master.module_id()),
            "-".to_string(),
            master
                .zone()
                .map_or_else(|| self.painter.unknown(UNKNOWN), |zone| zone.to_string()),
        ]
    }

    fn slave_row(&self, index: usize, slave: &SlaveDevice) -> Vec<String> {
        let Some(identity) = slave.identity() else {
            return vec![
                index.to_string(),
                slave.label().to_string(),
                self.painter.unknown(UNKNOWN),
                self.painter.unknown(UNKNOWN),
                self.painter.unknown(UNKNOWN),
                self.painter.unknown(UNKNOWN),
                self.painter.unknown(UNKNOWN),
            ];
        };
        vec![
            index.to_string(),
            slave.label().to_string(),
            self.painter.mac(&identity.module.mac.to_string()),
            identity.module.firmware_version.to_string(),
            format!("0x{:04X}", identity.module.module_id),
            identity.speaker.slot_index.to_string(),
            identity.speaker.zone.to_string(),
        ]
    }
}

impl Display for DeviceListView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut rows = Vec::with_capacity(self.directory.len() + 1);
        if let Some(master) = self.master {
            rows.push(self.master_row(master));
        }
        for (index, slave) in self.directory.iter().enumerate() {
            rows.push(self.slave_row(index, slave));
        }
        if rows.is_empty() {
            return write!(f, "{}", self.painter.unknown("No modules found"));
        }
        let table = Table::grid(
            ["#", "port", "mac", "firmware", "module", "slot", "zone"],
            rows,
        );
        write!(f, "{table}")?;

        let Some(topology) = self.topology else {
            return Ok(());
        };
        if let Some((expected, found)) = topology.master_mismatch {
            let found = found.map_or_else(|| "nothing".to_string(), |mac| mac.to_string());
            write!(
                f,
                "\n{}",
                self.painter
                    .mismatch(&format!("expected master {expected}, found {found}"))
            )?;
        }
        for mac in &topology.missing {
            write!(f, "\n{}", self.painter.mismatch(&format!("missing slave {mac}")))?;
        }
        for mac in &topology.unexpected {
            write!(f, "\n{}", self.painter.mismatch(&format!("unexpected slave {mac}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::MacAddress;
    use crate::hw::{ProbeOptions, SimulatedDevice, Transport};

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, last])
    }

    #[test]
    fn empty_bench_says_so() {
        let painter = Painter::new(false);
        let directory = DeviceDirectory::new();
        let rendered = DeviceListView::new(None, &directory, &painter).to_string();
        assert_eq!("No modules found", rendered);
    }

    #[tokio::test]
    async fn slaves_and_topology_warnings_are_listed() {
        let device = SimulatedDevice::slave(mac(1));
        let transport: Box<dyn Transport> = Box::new(device.transport("tty1"));
        let mut directory = DeviceDirectory::new();
        directory
            .set_coms(vec![transport], &ProbeOptions::default())
            .await
            .expect("probe should validate");
        let topology = TopologyReport {
            master_mismatch: None,
            missing: vec![mac(2)],
            unexpected: Vec::new(),
        };
        let painter = Painter::new(false);

        let rendered = DeviceListView::new(None, &directory, &painter)
            .with_topology(&topology)
            .to_string();

        assert!(rendered.contains("tty1"));
        assert!(rendered.contains("02:EA:00:00:00:01"));
        assert!(rendered.ends_with("missing slave 02:EA:00:00:00:02"));
    }
}
