//! Serial port interface for the LoRaWAN modem
//!
//! This module provides async serial communication with the modem using
//! tokio-serial. Inbound bytes are split into lines; outbound frames are
//! written raw after the port's output buffer has been cleared.

use crate::config::{InterfaceConfig, DEFAULT_BAUD_RATE};
use crate::error::{LinkError, Result};
use crate::interface::{ConnectionState, LineBuffer, LinkInterface};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, trace};

/// Buffer size for reading from serial port
const READ_BUFFER_SIZE: usize = 256;

/// Serial interface to the modem
pub struct SerialInterface {
    /// Serial port path
    port_path: PathBuf,

    /// Baud rate
    baud_rate: u32,

    /// Serial stream (when connected)
    stream: Option<SerialStream>,

    /// Current connection state
    state: ConnectionState,

    /// Partial inbound line
    lines: LineBuffer,

    /// Interface name for logging
    name: String,
}

impl SerialInterface {
    /// Create a new serial interface
    pub fn new(port: impl AsRef<Path>) -> Self {
        let port_path = port.as_ref().to_path_buf();
        let name = format!("serial:{}", port_path.display());

        Self {
            port_path,
            baud_rate: DEFAULT_BAUD_RATE,
            stream: None,
            state: ConnectionState::Disconnected,
            lines: LineBuffer::new(),
            name,
        }
    }

    /// Create from interface configuration
    pub fn from_config(config: &InterfaceConfig) -> Self {
        Self::new(&config.port).with_baud_rate(config.baud_rate)
    }

    /// Create with custom baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Get the port path
    pub fn port_path(&self) -> &Path {
        &self.port_path
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

#[async_trait]
impl LinkInterface for SerialInterface {
    async fn connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        info!(port = %self.port_path.display(), baud = self.baud_rate, "Connecting to serial port");

        if !self.port_path.exists() {
            self.state = ConnectionState::Disconnected;
            return Err(LinkError::PortNotFound(
                self.port_path.display().to_string(),
            ));
        }

        let stream = tokio_serial::new(self.port_path.to_string_lossy(), self.baud_rate)
            .open_native_async()
            .map_err(|e| {
                self.state = ConnectionState::Disconnected;
                LinkError::PortOpenFailed {
                    port: self.port_path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;

        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        self.lines.clear();

        info!(port = %self.port_path.display(), "Connected to LoRaWAN modem");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }

        self.state = ConnectionState::Disconnected;
        self.lines.clear();

        info!(port = %self.port_path.display(), "Disconnected from serial port");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.stream.is_some()
    }

    async fn read_line(&mut self) -> Result<Option<Bytes>> {
        if let Some(line) = self.lines.next_line() {
            return Ok(Some(line));
        }

        let stream = self.stream.as_mut().ok_or(LinkError::Disconnected)?;
        let mut buf = [0u8; READ_BUFFER_SIZE];

        match stream.read(&mut buf).await {
            Ok(0) => {
                // EOF - device disconnected
                self.state = ConnectionState::Disconnected;
                Err(LinkError::Disconnected)
            }
            Ok(n) => {
                trace!(bytes = n, "Read from serial port");
                self.lines.extend(&buf[..n]);
                Ok(self.lines.next_line())
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                error!(error = %e, "Serial read error");
                self.state = ConnectionState::Disconnected;
                Err(LinkError::ReadError(e.to_string()))
            }
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(LinkError::Disconnected)?;

        stream
            .clear(ClearBuffer::Output)
            .map_err(|e| LinkError::WriteError(format!("Output reset failed: {}", e)))?;

        debug!(size = frame.len(), "Writing frame");

        stream.write_all(frame).await.map_err(|e| {
            error!(error = %e, "Serial write error");
            self.state = ConnectionState::Disconnected;
            LinkError::WriteError(e.to_string())
        })?;

        stream
            .flush()
            .await
            .map_err(|e| LinkError::WriteError(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialInterface")
            .field("port", &self.port_path)
            .field("baud_rate", &self.baud_rate)
            .field("state", &self.state)
            .field("buffered", &self.lines.len())
            .finish()
    }
}
