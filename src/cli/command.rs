use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use bon::Builder;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

use crate::handlers::FlashSection;
use crate::hw::{
    DeviceSelector, DeviceSelectorError, FakeHardwareClient, HardwareClient, MasterLink,
    RealHardwareClient, UsbId,
};
use crate::protocol::DeviceClass;
use crate::utils::parse_number;

const DEFAULT_FAKE_SLAVES: u8 = 2;

/// Command-line options for the Summit protocol tool.
#[derive(Debug, Parser)]
#[command(name = "summit", about = "Talk to Summit wireless audio modules.")]
pub struct Args {
    /// Config file to use instead of `summit/config.json` in the config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log level; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Uses simulated modules instead of real hardware.
    #[arg(long, global = true)]
    fake: bool,
    /// Number of simulated slaves.
    #[arg(long, global = true, requires = "fake")]
    fake_slaves: Option<u8>,
    /// Serial port the master is attached to.
    #[arg(long, global = true, conflicts_with_all = ["master_usb", "fake"])]
    master_uart: Option<String>,
    /// USB `VID:PID` of the master, in hex.
    #[arg(long, global = true, conflicts_with = "fake")]
    master_usb: Option<UsbId>,
    /// Serial port to probe for slaves; repeatable. Defaults to every port.
    #[arg(long = "port", global = true, conflicts_with = "fake")]
    ports: Vec<String>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use summit::{Args, Command};
    ///
    /// let args = Args::new(Command::Ports).with_fake(3);
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            config: None,
            log_level: None,
            output: None,
            fake: false,
            fake_slaves: None,
            master_uart: None,
            master_usb: None,
            ports: Vec::new(),
            command,
        }
    }

    /// Switches to simulated hardware with `slaves` slaves.
    #[must_use]
    pub fn with_fake(mut self, slaves: u8) -> Self {
        self.fake = true;
        self.fake_slaves = Some(slaves);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Options for [`crate::run`] taken from the global flags.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions::builder()
            .maybe_config_path(self.config.clone())
            .maybe_log_level(self.log_level)
            .maybe_output_format(self.output)
            .build()
    }

    /// Hardware the command runs against.
    #[must_use]
    pub fn hardware_client(&self) -> Box<dyn HardwareClient> {
        if self.fake {
            return Box::new(FakeHardwareClient::new(
                self.fake_slaves.unwrap_or(DEFAULT_FAKE_SLAVES),
            ));
        }
        let master = match (&self.master_uart, self.master_usb) {
            (Some(path), _) => Some(MasterLink::Uart(path.clone())),
            (None, Some(id)) => Some(id.into()),
            (None, None) => None,
        };
        Box::new(RealHardwareClient::new(master, self.ports.clone()))
    }

    #[must_use]
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Global options for one run.
#[derive(Debug, Clone, Default, Builder)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
    /// Falls back to `pretty` on a terminal and `json` otherwise.
    pub output_format: Option<OutputFormat>,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the serial ports that can be probed.
    Ports,
    /// Connect to the master, probe the slave ports and list what was found.
    Devices,
    /// Read a register.
    Rd(ReadArgs),
    /// Write a register.
    Wr(WriteArgs),
    /// Load a firmware image and switch to it.
    FwLoad(FwLoadArgs),
    /// Describe a status code.
    Status(StatusArgs),
    /// Save a flash section to a file named after the module's MAC.
    Dump(DumpArgs),
    /// Write a manufacturing text file to flash.
    MfgLoad(MfgLoadArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Ports => "ports",
            Self::Devices => "devices",
            Self::Rd(_args) => "rd",
            Self::Wr(_args) => "wr",
            Self::FwLoad(_args) => "fw-load",
            Self::Status(_args) => "status",
            Self::Dump(_args) => "dump",
            Self::MfgLoad(_args) => "mfg-load",
        }
    }
}

/// Module a command is sent to.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum Target {
    #[default]
    Master,
    Slave(DeviceSelector),
}

impl FromStr for Target {
    type Err = DeviceSelectorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("master") {
            return Ok(Self::Master);
        }
        value.parse().map(Self::Slave)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Slave(selector) => write!(f, "{selector}"),
        }
    }
}

#[derive(Debug, Clone, ClapArgs)]
pub struct TargetArg {
    /// `master`, a slave index, or a slave MAC.
    #[arg(long, default_value = "master")]
    pub target: Target,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct ReadArgs {
    /// Register address, decimal or `0x` hex.
    #[arg(value_parser = parse_number)]
    pub address: u32,
    #[command(flatten)]
    pub target: TargetArg,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct WriteArgs {
    /// Register address, decimal or `0x` hex.
    #[arg(value_parser = parse_number)]
    pub address: u32,
    /// 16-bit value, decimal or `0x` hex.
    #[arg(value_parser = parse_register_value)]
    pub value: u16,
    #[command(flatten)]
    pub target: TargetArg,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct FwLoadArgs {
    /// Raw firmware image.
    pub file: PathBuf,
    /// Network index of a speaker to update through the master.
    #[arg(long)]
    pub slave: Option<u8>,
    #[command(flatten)]
    pub target: TargetArg,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct StatusArgs {
    /// Status byte, decimal or `0x` hex.
    #[arg(value_parser = parse_status_code)]
    pub code: u8,
    /// Device class whose table resolves the code.
    #[arg(long, default_value = "master")]
    pub class: DeviceClass,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct DumpArgs {
    /// `mfg`, `coef` or `system`.
    pub section: FlashSection,
    /// Prepended to the generated file name.
    #[arg(long)]
    pub prefix: Option<String>,
    /// Directory the file is written to.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,
    /// Replace an existing file.
    #[arg(long)]
    pub overwrite: bool,
    #[command(flatten)]
    pub target: TargetArg,
}

#[derive(Debug, Clone, ClapArgs)]
pub struct MfgLoadArgs {
    /// Manufacturing text file.
    pub file: PathBuf,
    /// Load even when the file's MAC differs from the module's.
    #[arg(long)]
    pub force: bool,
    #[command(flatten)]
    pub target: TargetArg,
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How command results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

fn parse_register_value(value: &str) -> Result<u16, String> {
    let parsed = parse_number(value)?;
    u16::try_from(parsed).map_err(|_error| format!("`{value}` does not fit in 16 bits"))
}

fn parse_status_code(value: &str) -> Result<u8, String> {
    let parsed = parse_number(value)?;
    u8::try_from(parsed).map_err(|_error| format!("`{value}` does not fit in 8 bits"))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::handlers::MacAddress;

    #[test]
    fn fake_slaves_require_fake_mode() {
        let error = Args::try_parse_from(["summit", "--fake-slaves", "3", "ports"])
            .expect_err("--fake-slaves should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn master_links_are_exclusive() {
        let error = Args::try_parse_from([
            "summit",
            "--master-uart",
            "/dev/ttyUSB0",
            "--master-usb",
            "2495:0016",
            "devices",
        ])
        .expect_err("two master links should be rejected");
        assert_eq!(ErrorKind::ArgumentConflict, error.kind());
    }

    #[test]
    fn read_accepts_hex_addresses_and_slave_targets() {
        let args = Args::try_parse_from([
            "summit",
            "--fake",
            "rd",
            "0x403024",
            "--target",
            "02:EA:00:00:00:01",
        ])
        .expect("rd arguments should parse");

        let Command::Rd(read) = args.into_command() else {
            panic!("expected rd command");
        };
        assert_eq!(0x0040_3024, read.address);
        assert_eq!(
            Target::Slave(DeviceSelector::Mac(MacAddress::new([
                0x02, 0xEA, 0x00, 0x00, 0x00, 0x01
            ]))),
            read.target.target
        );
    }

    #[test]
    fn write_rejects_values_wider_than_a_register() {
        let error = Args::try_parse_from(["summit", "wr", "0x10", "0x10000"])
            .expect_err("wide value should be rejected");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[rstest]
    #[case("master", Target::Master)]
    #[case("MASTER", Target::Master)]
    #[case("2", Target::Slave(DeviceSelector::Index(2)))]
    fn targets_parse(#[case] value: &str, #[case] expected: Target) {
        assert_eq!(expected, value.parse().expect("target should parse"));
    }

    #[test]
    fn dump_section_names_parse() {
        let args = Args::try_parse_from(["summit", "dump", "coef", "--target", "0"])
            .expect("dump arguments should parse");
        assert_matches!(
            args.into_command(),
            Command::Dump(DumpArgs {
                section: FlashSection::Coefficients,
                ..
            })
        );
    }

    #[test]
    fn status_class_defaults_to_master() {
        let args = Args::try_parse_from(["summit", "status", "0xE9"])
            .expect("status arguments should parse");
        assert_matches!(
            args.into_command(),
            Command::Status(StatusArgs {
                code: 0xE9,
                class: DeviceClass::Master
            })
        );
    }

    #[test]
    fn run_options_carry_the_global_flags() {
        let args = Args::try_parse_from([
            "summit",
            "--log-level",
            "debug",
            "--output",
            "json",
            "--config",
            "/tmp/summit.json",
            "ports",
        ])
        .expect("global flags should parse");

        let options = args.run_options();
        assert_eq!(Some(LogLevel::Debug), options.log_level);
        assert_eq!(Some(OutputFormat::Json), options.output_format);
        assert_eq!(Some(PathBuf::from("/tmp/summit.json")), options.config_path);
    }
}
