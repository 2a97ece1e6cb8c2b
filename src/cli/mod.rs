pub(crate) mod command;
pub(crate) mod devices;
pub(crate) mod firmware;
pub(crate) mod flash;
pub(crate) mod ports;
pub(crate) mod register;
pub(crate) mod status;
pub(crate) mod ui;

use std::io;

use anyhow::Result;
use serde::Serialize;

pub use self::command::{
    Args, Command, DumpArgs, FwLoadArgs, LogLevel, MfgLoadArgs, OutputFormat, ReadArgs,
    RunOptions, StatusArgs, Target, TargetArg, WriteArgs,
};

pub(crate) fn write_json_line(out: &mut impl io::Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
