use std::io;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{info, instrument, warn};

use crate::cli::{Command, LogLevel, OutputFormat, RunOptions, Target};
use crate::config::SummitConfig;
use crate::datalog::{DatalogSink, JsonLinesSink};
use crate::error::CliConfigError;
use crate::handlers::MacAddress;
use crate::hw::{
    DeviceDirectory, HardwareClient, MasterDevice, ProbeOptions, Session, SlaveDevice,
};
use crate::protocol::DeviceClass;
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// App-level helper for reaching the modules on a bench.
pub struct Workbench {
    hardware_client: Box<dyn HardwareClient>,
    config: SummitConfig,
    datalog: Option<Arc<dyn DatalogSink>>,
}

impl Workbench {
    /// Creates a workbench over `hardware_client` using `config` for session
    /// settings, probing and capture.
    ///
    /// ```
    /// # async fn demo() -> anyhow::Result<()> {
    /// use summit::{FakeHardwareClient, SummitConfig, Workbench};
    ///
    /// let bench = Workbench::new(Box::new(FakeHardwareClient::new(2)), SummitConfig::default());
    /// let master = bench.connect_master().await?;
    /// let slaves = bench.probe_slaves().await?;
    /// println!("{} with {} slaves", master.mac(), slaves.len());
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn new(hardware_client: Box<dyn HardwareClient>, config: SummitConfig) -> Self {
        Self {
            hardware_client,
            config,
            datalog: None,
        }
    }

    /// Sends every command record to `sink`.
    #[must_use]
    pub fn with_datalog(mut self, sink: Arc<dyn DatalogSink>) -> Self {
        self.datalog = Some(sink);
        self
    }

    #[must_use]
    pub fn config(&self) -> &SummitConfig {
        &self.config
    }

    /// Serial ports visible to the hardware client.
    #[must_use]
    pub fn available_ports(&self) -> Vec<String> {
        self.hardware_client.available_ports()
    }

    /// Returns whether a master link is configured.
    #[must_use]
    pub fn has_master(&self) -> bool {
        self.hardware_client.master_transport().is_some()
    }

    /// Opens and identifies the master.
    ///
    /// # Errors
    ///
    /// Returns an error if no master is configured or it cannot be
    /// identified.
    #[instrument(skip(self), level = "info")]
    pub async fn connect_master(&self) -> Result<MasterDevice> {
        let Some(transport) = self.hardware_client.master_transport() else {
            bail!(CliConfigError::NoMaster);
        };
        let mut session = Session::new(DeviceClass::Master, transport)
            .with_settings(self.config.session);
        if let Some(sink) = &self.datalog {
            session = session.with_datalog(Arc::clone(sink));
        }
        let master = MasterDevice::connect(session).await?;
        if let Some(dir) = self.config.capture.active_directory() {
            master.session().enable_capture(dir);
        }
        Ok(master)
    }

    /// Probes every candidate slave port and keeps the Summit slaves.
    ///
    /// # Errors
    ///
    /// Returns an error if a probe fails local validation.
    #[instrument(skip(self), level = "info")]
    pub async fn probe_slaves(&self) -> Result<DeviceDirectory> {
        let options = ProbeOptions::builder()
            .probe_timeout(self.config.probe.timeout)
            .settings(self.config.session)
            .maybe_datalog(self.datalog.clone())
            .maybe_capture_dir(
                self.config
                    .capture
                    .active_directory()
                    .map(std::path::Path::to_path_buf),
            )
            .build();
        let mut directory = DeviceDirectory::new();
        let found = directory
            .set_coms(self.hardware_client.slave_transports(), &options)
            .await?;
        info!(found, "slave probe finished");
        Ok(directory)
    }

    /// Connects to the module `target` names.
    ///
    /// # Errors
    ///
    /// Returns an error if the module cannot be reached.
    pub async fn connect(&self, target: Target) -> Result<ConnectedModule> {
        match target {
            Target::Master => Ok(ConnectedModule::Master(self.connect_master().await?)),
            Target::Slave(selector) => {
                let mut directory = self.probe_slaves().await?;
                let slave = directory.take(selector);
                directory.close_all().await;
                match slave {
                    Some(slave) => Ok(ConnectedModule::Slave(slave)),
                    None => bail!(CliConfigError::NoSuchDevice {
                        selector: selector.to_string(),
                    }),
                }
            }
        }
    }
}

/// A master or slave reached through a [`Workbench`].
#[derive(Debug)]
pub enum ConnectedModule {
    Master(MasterDevice),
    Slave(SlaveDevice),
}

impl ConnectedModule {
    #[must_use]
    pub fn session(&self) -> &Session {
        match self {
            Self::Master(master) => master.session(),
            Self::Slave(slave) => slave.session(),
        }
    }

    #[must_use]
    pub fn mac(&self) -> Option<MacAddress> {
        match self {
            Self::Master(master) => Some(master.mac()),
            Self::Slave(slave) => slave.mac(),
        }
    }

    pub async fn close(&self) {
        self.session().close().await;
    }
}

/// Runs the CLI command against `hardware_client`.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = summit::Args::try_parse_from(["summit", "--fake", "--output", "json", "devices"])?;
/// let hardware_client = args.hardware_client();
/// let options = args.run_options();
/// let mut out = Vec::new();
/// summit::run(args.into_command(), &mut out, hardware_client, options).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the config cannot be
/// loaded, a module cannot be reached, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    hardware_client: Box<dyn HardwareClient>,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(command, out, &SystemTerminalClient, hardware_client, options).await
}

/// Runs the CLI command with injected clients.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl summit::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = summit::Args::try_parse_from([
///     "summit",
///     "--log-level",
///     "debug",
///     "--fake",
///     "rd",
///     "0x403024",
/// ])?;
/// let hardware_client = args.hardware_client();
/// let options = args.run_options();
/// let mut out = Vec::new();
/// summit::run_with_clients(
///     args.into_command(),
///     &mut out,
///     &FakeTerminal,
///     hardware_client,
///     options,
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the config cannot be
/// loaded, a module cannot be reached, or output writing fails.
#[instrument(
    skip(out, terminal_client, hardware_client, options),
    level = "info",
    fields(command = command.name(), log_level = ?options.log_level)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    hardware_client: Box<dyn HardwareClient>,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "summit",
        terminal_client.stderr_is_terminal(),
        options.log_level.map(LogLevel::as_level_filter),
    )?;

    let output_format = options.output_format.unwrap_or(if terminal_client.stdout_is_terminal() {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });
    let config = SummitConfig::load(options.config_path.as_deref())?;
    let datalog = match &config.datalog.path {
        Some(path) => Some(Arc::new(JsonLinesSink::open(path)?) as Arc<dyn DatalogSink>),
        None => None,
    };
    let mut workbench = Workbench::new(hardware_client, config);
    if let Some(sink) = datalog {
        workbench = workbench.with_datalog(sink);
    }

    let result = match command {
        Command::Ports => crate::cli::ports::run(&workbench, out, output_format),
        Command::Devices => {
            crate::cli::devices::run(&workbench, out, terminal_client, output_format).await
        }
        Command::Rd(args) => crate::cli::register::read(&workbench, &args, out, output_format).await,
        Command::Wr(args) => {
            crate::cli::register::write(&workbench, &args, out, output_format).await
        }
        Command::FwLoad(args) => {
            crate::cli::firmware::run(&workbench, &args, out, output_format).await
        }
        Command::Status(args) => crate::cli::status::run(&args, out, output_format),
        Command::Dump(args) => crate::cli::flash::dump(&workbench, &args, out, output_format).await,
        Command::MfgLoad(args) => {
            crate::cli::flash::mfg_load(&workbench, &args, out, output_format).await
        }
    };
    if let Err(error) = &result {
        warn!(error = %error, "command failed");
    }
    result
}
