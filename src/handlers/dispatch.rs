use std::fmt;

use owo_colors::OwoColorize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::frame_codec::MAX_PAYLOAD_LEN;
use super::payload::{WirePayload, decode_payload, encode_payload};
use crate::datalog::CommandRecord;
use crate::hw::Session;
use crate::protocol::{CommandFamily, CommandId, DatalogMode, DeviceClass, RetryPolicy};
use crate::status::{FaultClass, SUCCESS_CODE, Status};

const TRACE_COLUMN: usize = 45;

/// One argument rendered in a trace line.
pub type TraceArg<'a> = &'a (dyn fmt::Display + Sync);

/// Local validation failures, raised before anything reaches the wire.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum CommandError {
    #[error("`{command}` is a {family} command and cannot be sent to a {class} module")]
    WrongDeviceClass {
        command: CommandId,
        family: CommandFamily,
        class: DeviceClass,
    },
    #[error("{field} {value} is out of range; maximum is {max}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },
    #[error("{field} {value} is below the minimum of {min}")]
    BelowMinimum {
        field: &'static str,
        value: u64,
        min: u64,
    },
    #[error("request payload of {len} bytes exceeds the {max}-byte frame limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("{section} data is not kept on {class} modules")]
    SectionUnavailable {
        section: &'static str,
        class: DeviceClass,
    },
    #[error("{section} data must be {expected} bytes, got {actual}")]
    SectionLength {
        section: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl CommandError {
    pub(crate) fn check_max(
        field: &'static str,
        value: impl Into<u64>,
        max: impl Into<u64>,
    ) -> Result<(), Self> {
        let (value, max) = (value.into(), max.into());
        if value > max {
            return Err(Self::OutOfRange { field, value, max });
        }
        Ok(())
    }
}

/// Outcome of a dispatched command: a status plus the decoded value on success.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Reply<T> {
    status: Status,
    value: Option<T>,
}

impl<T> Reply<T> {
    #[must_use]
    pub fn new(status: Status, value: Option<T>) -> Self {
        Self { status, value }
    }

    /// A reply carrying only a failure status.
    #[must_use]
    pub fn failed(status: Status) -> Self {
        Self {
            status,
            value: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    #[must_use]
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Splits into the `(status, value)` pair callers branch on.
    #[must_use]
    pub fn into_parts(self) -> (Status, Option<T>) {
        (self.status, self.value)
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        Reply {
            status: self.status,
            value: self.value.map(f),
        }
    }
}

/// Sends typed commands through a session, applying retry, timeout,
/// datalog and trace policy from the command registry.
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Renders the trace line for a call, padded so opcodes line up.
    ///
    /// ```
    /// use summit::{CommandDispatcher, CommandId};
    ///
    /// let line = CommandDispatcher::trace_line(CommandId::ReadRegister, &[&"0x400008"]);
    /// assert_eq!(
    ///     format!("{:<45}M:0x60 S:0x05", "  rd(0x400008)  "),
    ///     line
    /// );
    /// ```
    #[must_use]
    pub fn trace_line(command: CommandId, args: &[TraceArg<'_>]) -> String {
        let args = args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let call = format!("  {command}({args})  ");
        format!("{call:<TRACE_COLUMN$}{}", command.metadata().opcode())
    }

    /// Issues `command` with `request`, decoding a `Resp` from the reply.
    ///
    /// Idempotent commands are attempted up to `retries + 1` times and stop at
    /// the first success; the last status is returned when every attempt
    /// fails. Commands with an extended timeout apply it to each attempt
    /// only.
    ///
    /// # Errors
    ///
    /// Returns an error when the command does not belong to the session's
    /// device class or the request cannot fit in one frame.
    #[instrument(
        skip(session, trace_args, request),
        level = "debug",
        fields(session = %session.label(), %command)
    )]
    pub async fn call<Req, Resp>(
        session: &Session,
        command: CommandId,
        trace_args: &[TraceArg<'_>],
        request: &Req,
    ) -> Result<Reply<Resp>, CommandError>
    where
        Req: WirePayload + Sync,
        Resp: WirePayload + Send,
    {
        let metadata = command.metadata();
        let class = session.class();
        if !metadata.family().allows(class) {
            return Err(CommandError::WrongDeviceClass {
                command,
                family: metadata.family(),
                class,
            });
        }
        let payload = encode_payload(request);
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CommandError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let settings = session.settings();
        if settings.trace() {
            eprintln!("{}", Self::trace_line(command, trace_args).green());
        }
        let attempts = match metadata.retry() {
            RetryPolicy::Idempotent => settings.retries().saturating_add(1),
            RetryPolicy::SingleAttempt => 1,
        };

        let mut attempt = 1;
        loop {
            let reply = Self::attempt::<Resp>(session, command, payload.clone()).await;
            let status = reply.status();
            let retry = !status.is_success()
                && attempt < attempts
                && status.fault_class() != Some(FaultClass::Fatal);

            if metadata.datalog() == DatalogMode::PerAttempt {
                Self::record(session, command, status, retry, settings.log_errors_only());
            }
            if !retry {
                if metadata.datalog() == DatalogMode::Once {
                    Self::record(session, command, status, false, settings.log_errors_only());
                }
                if !status.is_success() {
                    debug!(attempt, %status, "command failed");
                }
                return Ok(reply);
            }

            debug!(attempt, attempts, %status, "command attempt failed; retrying");
            attempt += 1;
        }
    }

    /// Issues a command whose reply carries no payload.
    ///
    /// # Errors
    ///
    /// Returns the same validation errors as [`CommandDispatcher::call`].
    pub async fn send<Req>(
        session: &Session,
        command: CommandId,
        trace_args: &[TraceArg<'_>],
        request: &Req,
    ) -> Result<Status, CommandError>
    where
        Req: WirePayload + Sync,
    {
        Self::call::<Req, ()>(session, command, trace_args, request)
            .await
            .map(|reply| reply.status())
    }

    async fn attempt<Resp: WirePayload>(
        session: &Session,
        command: CommandId,
        payload: Vec<u8>,
    ) -> Reply<Resp> {
        let metadata = command.metadata();
        let _timeout = metadata
            .timeout()
            .map(|timeout| session.scoped_timeout(timeout));

        let frame = match session
            .exchange(metadata.opcode(), metadata.access(), payload)
            .await
        {
            Ok(frame) => frame,
            Err(fault) => return Reply::failed(Status::Link(fault)),
        };
        let status = Status::from_code(frame.status());
        if !status.is_success() {
            return Reply::failed(status);
        }

        match decode_payload::<Resp>(frame.payload()) {
            Ok(value) => Reply::new(status, Some(value)),
            Err(error) => {
                debug!(%error, "response payload did not match the command");
                Reply::failed(Status::Link(session.medium().await.malformed_fault()))
            }
        }
    }

    fn record(
        session: &Session,
        command: CommandId,
        status: Status,
        retry: bool,
        log_errors_only: bool,
    ) {
        let Some(sink) = session.datalog() else {
            return;
        };
        if log_errors_only && status.is_success() {
            return;
        }
        let record = CommandRecord {
            device: session.device_id(),
            command: command.to_string(),
            expected: SUCCESS_CODE,
            actual: status.code(),
            retry,
            timestamp: OffsetDateTime::now_utc(),
        };
        if let Err(error) = sink.record(&record) {
            warn!(%error, "failed to store command record");
        }
    }
}
