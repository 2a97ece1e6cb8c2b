use std::io;

use anyhow::Result;
use serde::Serialize;

use crate::cli::{OutputFormat, StatusArgs, write_json_line};
use crate::protocol::DeviceClass;
use crate::status::{LinkFault, Status};

#[derive(Serialize)]
struct StatusDescription {
    code: u8,
    class: DeviceClass,
    description: &'static str,
}

/// Executes the `status` command.
pub(crate) fn run<W>(args: &StatusArgs, out: &mut W, output_format: OutputFormat) -> Result<()>
where
    W: io::Write,
{
    let status = LinkFault::from_code(args.code)
        .map_or_else(|| Status::from_code(args.code), Status::Link);
    let description = status.describe(args.class);
    match output_format {
        OutputFormat::Pretty => writeln!(out, "0x{:02X}: {description}", args.code)?,
        OutputFormat::Json => write_json_line(
            out,
            &StatusDescription {
                code: args.code,
                class: args.class,
                description,
            },
        )?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn pretty_output_names_the_fault() {
        let mut out = Vec::new();
        run(
            &StatusArgs {
                code: 0xE9,
                class: DeviceClass::Slave,
            },
            &mut out,
            OutputFormat::Pretty,
        )
        .expect("status should render");

        assert_eq!("0xE9: Serial read timeout\n", String::from_utf8_lossy(&out));
    }

    #[test]
    fn json_output_is_one_line() {
        let mut out = Vec::new();
        run(
            &StatusArgs {
                code: 0x01,
                class: DeviceClass::Master,
            },
            &mut out,
            OutputFormat::Json,
        )
        .expect("status should render");

        assert_eq!(
            "{\"code\":1,\"class\":\"master\",\"description\":\"Success\"}\n",
            String::from_utf8_lossy(&out)
        );
    }
}
