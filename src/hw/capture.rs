use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use strum_macros::Display;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::handlers::MacAddress;
use crate::utils::format_hex;

/// Which way captured bytes travelled.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum CaptureDirection {
    #[strum(to_string = "TX")]
    Transmit,
    #[strum(to_string = "RX")]
    Receive,
}

/// Raw byte log for one module, one line per frame.
///
/// Lines look like `2026-01-01T00:00:00Z TX: 01 01 60 05 ..`.
#[derive(Debug)]
pub struct CaptureLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CaptureLog {
    /// Opens (appending) `<dir>/<MAC with dashes>.log`, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub fn open(dir: &Path, mac: MacAddress) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", mac.file_stem()));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn record(&mut self, direction: CaptureDirection, bytes: &[u8]) -> io::Result<()> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        writeln!(self.writer, "{timestamp} {direction}: {}", format_hex(bytes))?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn capture_lines_are_tagged_and_hex_encoded() {
        let dir = std::env::temp_dir().join(format!("summit-capture-{}", std::process::id()));
        let mac = MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, 0x07]);
        let mut log = CaptureLog::open(&dir, mac).expect("capture log should open");
        log.record(CaptureDirection::Transmit, &[0x01, 0x01, 0x60])
            .expect("capture line should be written");
        log.record(CaptureDirection::Receive, &[0xAB])
            .expect("capture line should be written");

        assert_eq!(dir.join("02-EA-00-00-00-07.log"), log.path());
        let contents = fs::read_to_string(log.path()).expect("capture log should be readable");
        let lines: Vec<_> = contents
            .lines()
            .map(|line| line.split_once(' ').map(|(_, rest)| rest.to_string()))
            .collect();
        assert_eq!(
            vec![Some("TX: 01 01 60".to_string()), Some("RX: AB".to_string())],
            lines
        );

        fs::remove_dir_all(&dir).expect("capture directory should be removed");
    }
}
