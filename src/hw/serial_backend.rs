use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, instrument, warn};

use super::transport::{Medium, Transport};

/// Line rate used by Summit modules.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
const OPEN_TIMEOUT: Duration = Duration::from_millis(100);

/// UART transport over a host serial port.
///
/// Port I/O is blocking, so every call runs on the blocking pool with the
/// port moved in and handed back afterwards.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SerialTransport {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_baud_rate(path, DEFAULT_BAUD_RATE)
    }

    #[must_use]
    pub fn with_baud_rate(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            port: None,
        }
    }

    async fn with_port<T, F>(&mut self, operation: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SerialPort) -> T + Send + 'static,
    {
        let mut port = self.port.take()?;
        let joined = tokio::task::spawn_blocking(move || {
            let output = operation(port.as_mut());
            (port, output)
        })
        .await;
        match joined {
            Ok((port, output)) => {
                self.port = Some(port);
                Some(output)
            }
            Err(error) => {
                warn!(%error, path = %self.path, "serial I/O task failed; port dropped");
                None
            }
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.path
    }

    fn medium(&self) -> Medium {
        Medium::Uart
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    #[instrument(skip(self), level = "debug", fields(path = %self.path))]
    async fn open(&mut self) -> bool {
        if self.port.is_some() {
            return true;
        }
        let builder = serialport::new(self.path.clone(), self.baud_rate).timeout(OPEN_TIMEOUT);
        match tokio::task::spawn_blocking(move || builder.open()).await {
            Ok(Ok(port)) => {
                self.port = Some(port);
                true
            }
            Ok(Err(error)) => {
                debug!(%error, "serial port open failed");
                false
            }
            Err(error) => {
                warn!(%error, "serial open task failed");
                false
            }
        }
    }

    async fn close(&mut self) {
        self.port = None;
    }

    async fn write(&mut self, bytes: &[u8]) -> usize {
        let bytes = bytes.to_vec();
        self.with_port(move |port| {
            let mut written = 0;
            while written < bytes.len() {
                match port.write(&bytes[written..]) {
                    Ok(0) => break,
                    Ok(count) => written += count,
                    Err(error) if error.kind() == ErrorKind::Interrupted => {}
                    Err(_error) => break,
                }
            }
            if port.flush().is_err() {
                return 0;
            }
            written
        })
        .await
        .unwrap_or(0)
    }

    async fn read(&mut self, max: usize, timeout: Duration) -> Vec<u8> {
        if max == 0 {
            return Vec::new();
        }
        self.with_port(move |port| {
            if port.set_timeout(timeout).is_err() {
                return Vec::new();
            }
            let mut buffer = vec![0u8; max];
            let count = port.read(&mut buffer).unwrap_or(0);
            buffer.truncate(count);
            buffer
        })
        .await
        .unwrap_or_default()
    }

    async fn flush_input(&mut self) {
        if let Some(port) = self.port.as_mut()
            && let Err(error) = port.clear(ClearBuffer::Input)
        {
            debug!(%error, path = %self.path, "failed to clear serial input");
        }
    }
}

/// Lists candidate serial device nodes on this host.
#[must_use]
pub fn enumerate_serial_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|port| port.port_name).collect(),
        Err(error) => {
            warn!(%error, "failed to enumerate serial ports");
            Vec::new()
        }
    }
}
