use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::handlers::{FlashSection, MacAddress};

/// Line holding the MAC address, counted from one.
pub const MAC_LINE: usize = 12;
const MAC_FIELD: &str = "MacAddress";

/// Field layout of the manufacturing section, in flash order.
const FIELDS: &[(&str, usize)] = &[
    ("Signature", 4),
    ("Version", 2),
    ("ModuleId", 2),
    ("HardwareType", 1),
    ("HardwareRevision", 1),
    ("SerialNumber", 16),
    ("ManufactureDate", 4),
    ("RegionCode", 1),
    ("AntennaConfig", 1),
    ("CrystalTrim", 2),
    ("TxPowerTable", 16),
    (MAC_FIELD, 6),
    ("RadioCalibration", 32),
    ("Reserved", 40),
];

/// Errors returned while reading or checking a manufacturing text file.
#[derive(Debug, Error)]
pub enum MfgFileError {
    #[error("failed to read manufacturing file `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write manufacturing file `{path}`")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: `{token}` is not a hex byte")]
    InvalidByte { line: usize, token: String },
    #[error("line {line}: expected field `{expected}`, found `{found}`")]
    UnexpectedField {
        line: usize,
        expected: &'static str,
        found: String,
    },
    #[error("line {line}: field `{field}` must hold {expected} bytes, found {actual}")]
    FieldLength {
        line: usize,
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("file has {actual} fields, expected {expected}")]
    FieldCount { expected: usize, actual: usize },
    #[error("section holds {actual} bytes, expected {expected}")]
    SectionLength { expected: usize, actual: usize },
    #[error("file is for {file}, but the device is {device}; pass force to override")]
    MacMismatch { file: MacAddress, device: MacAddress },
}

/// Manufacturing data in its editable text form.
///
/// Each line is the field's bytes as hex pairs followed by the field name:
///
/// ```text
/// 02 EA 00 00 00 01 MacAddress
/// ```
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MfgFile {
    data: Vec<u8>,
}

impl MfgFile {
    /// Wraps a raw manufacturing section.
    ///
    /// # Errors
    ///
    /// Returns an error when `data` is not exactly one section long.
    pub fn from_section(data: Vec<u8>) -> Result<Self, MfgFileError> {
        let expected = FlashSection::Manufacturing.size();
        if data.len() != expected {
            return Err(MfgFileError::SectionLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data })
    }

    /// Parses the text form.
    ///
    /// ```
    /// use summit::{MacAddress, MfgFile};
    ///
    /// let section = vec![0u8; 128];
    /// let text = MfgFile::from_section(section.clone())?.render();
    /// let parsed = MfgFile::parse(&text)?;
    /// assert_eq!(MacAddress::new([0; 6]), parsed.mac());
    /// assert_eq!(section, parsed.into_section());
    /// # Ok::<(), summit::MfgFileError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when a line is malformed, a field has the wrong
    /// length, or fields are missing or out of order.
    pub fn parse(text: &str) -> Result<Self, MfgFileError> {
        let lines: Vec<(usize, &str)> = text
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.trim()))
            .filter(|(_line, content)| !content.is_empty())
            .collect();
        if lines.len() != FIELDS.len() {
            return Err(MfgFileError::FieldCount {
                expected: FIELDS.len(),
                actual: lines.len(),
            });
        }

        let mut data = Vec::with_capacity(FlashSection::Manufacturing.size());
        for ((line, content), (field, len)) in lines.into_iter().zip(FIELDS) {
            let mut tokens: Vec<&str> = content.split_whitespace().collect();
            let found = tokens.pop().unwrap_or_default();
            if found != *field {
                return Err(MfgFileError::UnexpectedField {
                    line,
                    expected: field,
                    found: found.to_string(),
                });
            }
            if tokens.len() != *len {
                return Err(MfgFileError::FieldLength {
                    line,
                    field,
                    expected: *len,
                    actual: tokens.len(),
                });
            }
            for token in tokens {
                let byte = u8::from_str_radix(token, 16).map_err(|_error| {
                    MfgFileError::InvalidByte {
                        line,
                        token: token.to_string(),
                    }
                })?;
                data.push(byte);
            }
        }
        Ok(Self { data })
    }

    /// Reads and parses a file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, MfgFileError> {
        let text = std::fs::read_to_string(path).map_err(|source| MfgFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Renders the text form, one field per line.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = String::new();
        let mut offset = 0;
        for (field, len) in FIELDS {
            for byte in &self.data[offset..offset + len] {
                let _ = write!(text, "{byte:02X} ");
            }
            text.push_str(field);
            text.push('\n');
            offset += len;
        }
        text
    }

    /// Writes the text form to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), MfgFileError> {
        std::fs::write(path, self.render()).map_err(|source| MfgFileError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// MAC address recorded on line [`MAC_LINE`].
    #[must_use]
    pub fn mac(&self) -> MacAddress {
        let offset: usize = FIELDS[..MAC_LINE - 1].iter().map(|(_field, len)| len).sum();
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&self.data[offset..offset + 6]);
        MacAddress::new(octets)
    }

    /// Refuses to program data recorded for another device unless forced.
    ///
    /// # Errors
    ///
    /// Returns an error when the MACs differ and `force` is not set.
    pub fn ensure_matches(&self, device: MacAddress, force: bool) -> Result<(), MfgFileError> {
        let file = self.mac();
        if file == device {
            return Ok(());
        }
        if force {
            warn!(%file, %device, "writing manufacturing data recorded for another device");
            return Ok(());
        }
        Err(MfgFileError::MacMismatch { file, device })
    }

    /// Raw section bytes, ready for flashing.
    #[must_use]
    pub fn section(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_section(self) -> Vec<u8> {
        self.data
    }
}

/// Name of the file a section dump is written to, for example
/// `bench_02-EA-00-00-00-01_mfg.txt`.
#[must_use]
pub fn dump_file_name(prefix: Option<&str>, mac: MacAddress, section: FlashSection) -> String {
    let extension = match section {
        FlashSection::Manufacturing => "txt",
        FlashSection::Coefficients | FlashSection::System => "bin",
    };
    let stem = format!("{}_{section}.{extension}", mac.file_stem());
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}_{stem}"),
        _ => stem,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const MAC: MacAddress = MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, 0x01]);

    fn section_with_mac(mac: MacAddress) -> Vec<u8> {
        let mut data = vec![0u8; 128];
        data[50..56].copy_from_slice(&mac.octets());
        data
    }

    #[test]
    fn fields_cover_the_whole_section() {
        let total: usize = FIELDS.iter().map(|(_field, len)| len).sum();
        assert_eq!(FlashSection::Manufacturing.size(), total);
        assert_eq!(MAC_FIELD, FIELDS[MAC_LINE - 1].0);
    }

    #[test]
    fn mac_is_on_line_twelve() {
        let file = MfgFile::from_section(section_with_mac(MAC)).expect("section should wrap");
        let text = file.render();

        assert_eq!(
            Some("02 EA 00 00 00 01 MacAddress"),
            text.lines().nth(MAC_LINE - 1)
        );
        assert_eq!(MAC, file.mac());
    }

    #[test]
    fn parse_reads_back_rendered_text() {
        let data: Vec<u8> = (0..128).collect();
        let file = MfgFile::from_section(data.clone()).expect("section should wrap");

        let parsed = MfgFile::parse(&file.render()).expect("rendered text should parse");

        assert_eq!(data, parsed.into_section());
    }

    #[test]
    fn parse_reports_bad_bytes_with_line_numbers() {
        let file = MfgFile::from_section(vec![0; 128]).expect("section should wrap");
        let text = file.render().replacen("00 00 00 00 Signature", "00 ZZ 00 00 Signature", 1);

        assert_matches!(
            MfgFile::parse(&text),
            Err(MfgFileError::InvalidByte { line: 1, token }) if token == "ZZ"
        );
    }

    #[test]
    fn mismatched_mac_requires_force() {
        let file = MfgFile::from_section(section_with_mac(MAC)).expect("section should wrap");
        let other = MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, 0x02]);

        assert_matches!(
            file.ensure_matches(other, false),
            Err(MfgFileError::MacMismatch { .. })
        );
        assert_matches!(file.ensure_matches(other, true), Ok(()));
        assert_matches!(file.ensure_matches(MAC, false), Ok(()));
    }

    #[rstest]
    #[case(None, FlashSection::Manufacturing, "02-EA-00-00-00-01_mfg.txt")]
    #[case(Some("bench"), FlashSection::Manufacturing, "bench_02-EA-00-00-00-01_mfg.txt")]
    #[case(Some(""), FlashSection::Coefficients, "02-EA-00-00-00-01_coef.bin")]
    fn dump_names_follow_mac_and_section(
        #[case] prefix: Option<&str>,
        #[case] section: FlashSection,
        #[case] expected: &str,
    ) {
        assert_eq!(expected, dump_file_name(prefix, MAC, section));
    }
}
