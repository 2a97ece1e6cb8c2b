use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bon::Builder;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::capture::{CaptureDirection, CaptureLog};
use super::transport::{Medium, Transport};
use crate::datalog::DatalogSink;
use crate::handlers::{Frame, MacAddress, Opcode, read_frame};
use crate::protocol::{CommandAccess, DeviceClass};
use crate::status::LinkFault;

/// Retry count applied when none is configured.
pub const DEFAULT_RETRIES: u32 = 5;
/// Per-read deadline applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Mutable per-device policy knobs.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Builder, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Extra attempts made for idempotent commands.
    #[builder(default = DEFAULT_RETRIES)]
    retries: u32,
    #[builder(default = DEFAULT_TIMEOUT)]
    #[serde(with = "crate::utils::humantime_duration")]
    timeout: Duration,
    /// Print one line per command with its opcode pair.
    #[builder(default)]
    trace: bool,
    /// Suppress datalog records for attempts that succeeded.
    #[builder(default)]
    log_errors_only: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionSettings {
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn trace(&self) -> bool {
        self.trace
    }

    #[must_use]
    pub fn log_errors_only(&self) -> bool {
        self.log_errors_only
    }
}

/// One open conversation with a module over one transport.
///
/// The transport lock is held for the whole write+read exchange, so
/// concurrent callers never interleave requests on the same channel.
pub struct Session {
    label: String,
    class: DeviceClass,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    settings: Mutex<SessionSettings>,
    sequence: AtomicU8,
    datalog: Option<Arc<dyn DatalogSink>>,
    identity: Mutex<Option<MacAddress>>,
    capture: Mutex<Option<CaptureLog>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("label", &self.label)
            .field("class", &self.class)
            .field("settings", &self.settings())
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wraps a transport; the transport is not opened.
    #[must_use]
    pub fn new(class: DeviceClass, transport: Box<dyn Transport>) -> Self {
        Self {
            label: transport.name().to_string(),
            class,
            transport: tokio::sync::Mutex::new(transport),
            settings: Mutex::new(SessionSettings::default()),
            sequence: AtomicU8::new(0),
            datalog: None,
            identity: Mutex::new(None),
            capture: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_settings(self, settings: SessionSettings) -> Self {
        *self.lock_settings() = settings;
        self
    }

    #[must_use]
    pub fn with_datalog(mut self, sink: Arc<dyn DatalogSink>) -> Self {
        self.datalog = Some(sink);
        self
    }

    /// Transport name, such as `/dev/ttyUSB0`.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn class(&self) -> DeviceClass {
        self.class
    }

    pub(crate) fn datalog(&self) -> Option<&Arc<dyn DatalogSink>> {
        self.datalog.as_ref()
    }

    fn lock_settings(&self) -> MutexGuard<'_, SessionSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current policy knobs.
    #[must_use]
    pub fn settings(&self) -> SessionSettings {
        *self.lock_settings()
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.lock_settings().retries
    }

    pub fn set_retries(&self, retries: u32) {
        self.lock_settings().retries = retries;
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.lock_settings().timeout
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.lock_settings().timeout = timeout;
    }

    pub fn set_trace(&self, trace: bool) {
        self.lock_settings().trace = trace;
    }

    pub fn set_log_errors_only(&self, log_errors_only: bool) {
        self.lock_settings().log_errors_only = log_errors_only;
    }

    /// Applies `timeout` until the returned guard is dropped.
    ///
    /// ```
    /// use std::time::Duration;
    /// use summit::{DeviceClass, FakeTransport, Session};
    ///
    /// let session = Session::new(DeviceClass::Slave, Box::new(FakeTransport::silent("fake")));
    /// let before = session.timeout();
    /// {
    ///     let _scope = session.scoped_timeout(Duration::from_secs(20));
    ///     assert_eq!(Duration::from_secs(20), session.timeout());
    /// }
    /// assert_eq!(before, session.timeout());
    /// ```
    #[must_use = "the override ends when the guard is dropped"]
    pub fn scoped_timeout(&self, timeout: Duration) -> TimeoutScope<'_> {
        let previous = std::mem::replace(&mut self.lock_settings().timeout, timeout);
        TimeoutScope {
            session: self,
            previous,
        }
    }

    /// Applies `retries` until the returned guard is dropped.
    #[must_use = "the override ends when the guard is dropped"]
    pub fn scoped_retries(&self, retries: u32) -> RetryScope<'_> {
        let previous = std::mem::replace(&mut self.lock_settings().retries, retries);
        RetryScope {
            session: self,
            previous,
        }
    }

    /// MAC learned from the module, if identified.
    #[must_use]
    pub fn identity(&self) -> Option<MacAddress> {
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_identity(&self, mac: MacAddress) {
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = Some(mac);
    }

    /// Name used in datalog records: the MAC when known, else the label.
    #[must_use]
    pub fn device_id(&self) -> String {
        self.identity()
            .map_or_else(|| self.label.clone(), |mac| mac.to_string())
    }

    /// Starts raw capture into `<dir>/<MAC>.log`. Requires a known identity.
    ///
    /// Returns whether capture is now active.
    pub fn enable_capture(&self, dir: &Path) -> bool {
        let Some(mac) = self.identity() else {
            debug!(session = %self.label, "capture requested before identity is known");
            return false;
        };
        match CaptureLog::open(dir, mac) {
            Ok(log) => {
                debug!(path = %log.path().display(), "raw capture enabled");
                *self.capture.lock().unwrap_or_else(PoisonError::into_inner) = Some(log);
                true
            }
            Err(error) => {
                warn!(%error, session = %self.label, "failed to open capture log");
                false
            }
        }
    }

    fn capture(&self, direction: CaptureDirection, bytes: &[u8]) {
        let mut capture = self.capture.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(log) = capture.as_mut()
            && let Err(error) = log.record(direction, bytes)
        {
            warn!(%error, "raw capture write failed; disabling capture");
            *capture = None;
        }
    }

    /// Opens the transport.
    #[instrument(skip(self), level = "debug", fields(session = %self.label))]
    pub async fn open(&self) -> bool {
        self.transport.lock().await.open().await
    }

    pub async fn close(&self) {
        self.transport.lock().await.close().await;
    }

    pub async fn is_open(&self) -> bool {
        self.transport.lock().await.is_open()
    }

    pub async fn medium(&self) -> Medium {
        self.transport.lock().await.medium()
    }

    /// Discards buffered input, used after a desynchronising fault.
    pub async fn flush_input(&self) {
        self.transport.lock().await.flush_input().await;
    }

    /// Re-locates the device after a reset that may have changed its handle.
    pub async fn rediscover(&self) -> bool {
        self.transport.lock().await.rediscover().await
    }

    /// Writes bytes outside the framed protocol.
    ///
    /// Returns whether every byte was accepted.
    pub async fn write_raw(&self, bytes: &[u8]) -> bool {
        let mut transport = self.transport.lock().await;
        if !transport.is_open() {
            return false;
        }
        self.capture(CaptureDirection::Transmit, bytes);
        transport.write(bytes).await == bytes.len()
    }

    /// Performs one request/response exchange under the transport lock.
    ///
    /// Pending input is discarded before the request is written.
    ///
    /// # Errors
    ///
    /// Returns the link fault that ended the exchange.
    #[instrument(skip(self, payload), level = "trace", fields(session = %self.label, %opcode, %access))]
    pub(crate) async fn exchange(
        &self,
        opcode: Opcode,
        access: CommandAccess,
        payload: Vec<u8>,
    ) -> Result<Frame, LinkFault> {
        let timeout = self.timeout();
        let mut transport = self.transport.lock().await;
        if !transport.is_open() {
            return Err(LinkFault::PortClosed);
        }
        let medium = transport.medium();
        // A reply that missed an earlier deadline must not answer this request.
        transport.flush_input().await;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let request = Frame::request(opcode, access, sequence, payload);
        let bytes = request.encode().map_err(|_error| medium.write_fault())?;
        self.capture(CaptureDirection::Transmit, &bytes);
        let written = transport.write(&bytes).await;
        if written != bytes.len() {
            debug!(written, expected = bytes.len(), "short write");
            return Err(medium.write_fault());
        }

        let response = read_frame(&mut **transport, timeout).await?;
        if let Ok(raw) = response.encode() {
            self.capture(CaptureDirection::Receive, &raw);
        }
        if !request.is_answered_by(&response) {
            debug!(
                expected = %request.opcode(),
                actual = %response.opcode(),
                "response does not answer request"
            );
            return Err(medium.malformed_fault());
        }
        Ok(response)
    }
}

/// Restores the previous session timeout when dropped.
#[derive(Debug)]
pub struct TimeoutScope<'a> {
    session: &'a Session,
    previous: Duration,
}

impl Drop for TimeoutScope<'_> {
    fn drop(&mut self) {
        self.session.set_timeout(self.previous);
    }
}

/// Restores the previous retry count when dropped.
#[derive(Debug)]
pub struct RetryScope<'a> {
    session: &'a Session,
    previous: u32,
}

impl Drop for RetryScope<'_> {
    fn drop(&mut self) {
        self.session.set_retries(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::handlers::{IDENTITY_REGISTER, RegisterHandler};
    use crate::hw::{FakeReply, FakeTransport, SimulatedDevice};
    use crate::status::{SUCCESS_CODE, Status};

    fn mac() -> MacAddress {
        MacAddress::new([0x02, 0xEA, 0x00, 0x00, 0x00, 0x02])
    }

    #[test]
    fn settings_default_to_five_retries() {
        let settings = SessionSettings::default();
        assert_eq!(DEFAULT_RETRIES, settings.retries());
        assert_eq!(DEFAULT_TIMEOUT, settings.timeout());
        assert!(!settings.trace());
    }

    #[test]
    fn settings_read_humantime_durations() {
        let settings: SessionSettings =
            serde_json::from_str(r#"{"retries": 2, "timeout": "250ms"}"#)
                .expect("settings should parse");
        assert_eq!(
            SessionSettings::builder()
                .retries(2)
                .timeout(Duration::from_millis(250))
                .build(),
            settings
        );
    }

    #[test]
    fn nested_timeout_scopes_unwind_in_order() {
        let session = Session::new(DeviceClass::Slave, Box::new(FakeTransport::silent("fake")));
        session.set_timeout(Duration::from_millis(100));
        {
            let _outer = session.scoped_timeout(Duration::from_secs(3));
            {
                let _inner = session.scoped_timeout(Duration::from_secs(30));
                assert_eq!(Duration::from_secs(30), session.timeout());
            }
            assert_eq!(Duration::from_secs(3), session.timeout());
        }
        assert_eq!(Duration::from_millis(100), session.timeout());
    }

    #[test]
    fn retry_scope_restores_previous_count() {
        let session = Session::new(DeviceClass::Slave, Box::new(FakeTransport::silent("fake")));
        {
            let _scope = session.scoped_retries(0);
            assert_eq!(0, session.retries());
        }
        assert_eq!(DEFAULT_RETRIES, session.retries());
    }

    #[tokio::test]
    async fn exchange_on_closed_transport_reports_port_closed() {
        let session = Session::new(DeviceClass::Slave, Box::new(FakeTransport::silent("fake")));
        assert_matches!(
            session
                .exchange(Opcode::new(0x60, 0x05), CommandAccess::Query, Vec::new())
                .await,
            Err(LinkFault::PortClosed)
        );
    }

    #[tokio::test]
    async fn short_write_maps_to_medium_write_fault() {
        let transport = FakeTransport::silent("usb").with_medium(Medium::Usb).with_write_limit(4);
        let session = Session::new(DeviceClass::Slave, Box::new(transport));
        assert!(session.open().await);

        assert_matches!(
            session
                .exchange(Opcode::new(0x60, 0x05), CommandAccess::Query, vec![0; 4])
                .await,
            Err(LinkFault::UsbWriteFailed)
        );
    }

    #[tokio::test]
    async fn mismatched_response_is_malformed() {
        let transport = FakeTransport::new("fake", |request: &Frame| {
            let other = Frame::request(Opcode::new(0x10, 0x02), request.access(), 0, Vec::new());
            FakeReply::Frame(Frame::response_to(&other, 0x01, Vec::new()))
        });
        let session = Session::new(DeviceClass::Slave, Box::new(transport));
        assert!(session.open().await);

        assert_matches!(
            session
                .exchange(Opcode::new(0x60, 0x05), CommandAccess::Query, vec![0; 4])
                .await,
            Err(LinkFault::MalformedPacket)
        );
    }

    #[tokio::test]
    async fn late_duplicate_reply_does_not_answer_the_next_request() {
        let mut calls = 0;
        let transport = FakeTransport::new("fake", move |request: &Frame| {
            calls += 1;
            let reply = Frame::response_to(request, SUCCESS_CODE, vec![0x02, 0xEA]);
            let mut bytes = reply.encode().expect("reply should encode");
            if calls == 1 {
                bytes.extend(reply.encode().expect("reply should encode"));
            }
            FakeReply::Bytes(bytes)
        });
        let journal = transport.journal();
        let session = Session::new(DeviceClass::Slave, Box::new(transport));
        session.set_retries(0);
        assert!(session.open().await);

        let mut statuses = Vec::new();
        for _ in 0..6 {
            let reply = RegisterHandler::read(&session, IDENTITY_REGISTER)
                .await
                .expect("rd is valid on a slave");
            statuses.push(reply.status());
        }

        assert_eq!(vec![Status::Success; 6], statuses);
        assert_eq!(6, journal.frame_count());
        assert_eq!(6, journal.flush_count());
    }

    #[tokio::test]
    async fn device_id_prefers_identity_over_label() {
        let device = SimulatedDevice::slave(mac());
        let session = Session::new(DeviceClass::Slave, Box::new(device.transport("ttyS9")));
        assert_eq!("ttyS9", session.device_id());

        session.set_identity(mac());
        assert_eq!("02:EA:00:00:00:02", session.device_id());
    }
}
