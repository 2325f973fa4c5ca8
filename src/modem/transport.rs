use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info, trace};
use crate::modem::buffer::LineBuffer;
use crate::modem::types::ModemError;

const READ_CHUNK_SIZE: usize = 1024;

/// The byte stream underneath a [`SerialTransport`]. Implemented for the real
/// serial port and, in tests, for an in-memory duplex pipe.
pub trait SerialPortIo: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Drops anything waiting in the OS input and output buffers.
    fn discard_buffers(&mut self) -> io::Result<()>;
}

impl SerialPortIo for SerialStream {
    fn discard_buffers(&mut self) -> io::Result<()> {
        use tokio_serial::{ClearBuffer, SerialPort};
        self.clear(ClearBuffer::All).map_err(io::Error::from)
    }
}

/// Interrupts a `read_line` that is blocked inside another task, without
/// needing the session lock. Only reads that are already waiting are woken.
#[derive(Clone, Default)]
pub struct ReadCanceller {
    notify: Arc<Notify>
}
impl ReadCanceller {
    pub fn cancel(&self) {
        self.notify.notify_waiters();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub read_timeout: Duration,
    pub write_timeout: Duration
}
impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3)
        }
    }
}

pub struct SerialTransport<P> {
    port: Option<P>,
    name: String,
    buffer: LineBuffer,
    canceller: ReadCanceller,
    settings: TransportSettings
}

impl SerialTransport<SerialStream> {

    /// Opens the OS serial port as 8N1 without flow control.
    pub fn open(device: &str, baud: u32, settings: TransportSettings) -> Result<Self, ModemError> {
        let port = tokio_serial::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open_native_async()
            .map_err(|source| ModemError::PortUnavailable { port: device.to_string(), source })?;

        info!("Opened serial port {} at {} baud", device, baud);
        Ok(Self::new(port, device, settings))
    }
}

impl<P: SerialPortIo> SerialTransport<P> {
    pub fn new(port: P, name: impl Into<String>, settings: TransportSettings) -> Self {
        Self {
            port: Some(port),
            name: name.into(),
            buffer: LineBuffer::new(),
            canceller: ReadCanceller::default(),
            settings
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn read_timeout(&self) -> Duration {
        self.settings.read_timeout
    }

    pub fn canceller(&self) -> ReadCanceller {
        self.canceller.clone()
    }

    /// Reads one CR or LF terminated line. Returns `None` if nothing arrived before the
    /// timeout or the read was cancelled. A partial line is returned as-is on timeout.
    pub async fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, ModemError> {
        let deadline = Instant::now() + timeout;
        let canceller = self.canceller.clone();

        loop {
            if let Some(line) = self.buffer.next_line() {
                trace!("{} <- {:?}", self.name, String::from_utf8_lossy(&line));
                return Ok(Some(line));
            }

            let filled = tokio::select! {
                biased;
                _ = canceller.notify.notified() => {
                    debug!("Pending read on {} cancelled", self.name);
                    return Ok(None);
                }
                result = self.fill(deadline) => result?
            };

            if !filled {
                let partial = self.buffer.take_all();
                return Ok((!partial.is_empty()).then_some(partial));
            }
        }
    }

    /// Reads raw bytes until `max` are available or the timeout elapses.
    pub async fn read_chunk(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>, ModemError> {
        let deadline = Instant::now() + timeout;
        while self.buffer.len() < max {
            if !self.fill(deadline).await? {
                break;
            }
        }
        Ok(self.buffer.take(max))
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), ModemError> {
        let write_timeout = self.settings.write_timeout;
        let port = self.port.as_mut().ok_or(ModemError::Closed)?;

        let write = async {
            port.write_all(data).await?;
            port.flush().await
        };
        match tokio::time::timeout(write_timeout, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ModemError::WriteTimeout(write_timeout))
        }
    }

    /// Drops buffered input so stale bytes are never read as the next response.
    pub fn discard_buffers(&mut self) -> Result<(), ModemError> {
        self.buffer.clear();
        if let Some(port) = self.port.as_mut() {
            port.discard_buffers()?;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.canceller.cancel();
        self.buffer.clear();
        if self.port.take().is_some() {
            info!("Closed serial port {}", self.name);
        }
    }

    /// Reads whatever arrives before the deadline into the buffer. Returns false on timeout.
    async fn fill(&mut self, deadline: Instant) -> Result<bool, ModemError> {
        let port = self.port.as_mut().ok_or(ModemError::Closed)?;
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        match timeout_at(deadline, port.read(&mut chunk)).await {
            Err(_) => Ok(false),
            Ok(Ok(0)) => Err(ModemError::Closed),
            Ok(Ok(n)) => {
                self.buffer.push(&chunk[..n]);
                Ok(true)
            },
            Ok(Err(e)) => Err(e.into())
        }
    }
}
