//! Scripted in-memory modem for exercising the driver without hardware.

use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use crate::modem::commands;
use crate::modem::transport::{SerialPortIo, SerialTransport, TransportSettings};

impl SerialPortIo for DuplexStream {
    fn discard_buffers(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Handle to the fake device. Dropping it stops the device task.
pub struct MockModem {
    commands: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<u8>>>,
    inject_tx: mpsc::UnboundedSender<Vec<u8>>,
    handle: JoinHandle<()>
}

impl MockModem {

    /// Spawns a device that answers each CR terminated command with whatever
    /// `responder` returns for it.
    pub fn spawn<F>(responder: F) -> (SerialTransport<DuplexStream>, MockModem)
    where
        F: FnMut(&str) -> Vec<u8> + Send + 'static
    {
        Self::spawn_with_settings(responder, TransportSettings::default())
    }

    pub fn spawn_with_settings<F>(responder: F, settings: TransportSettings) -> (SerialTransport<DuplexStream>, MockModem)
    where
        F: FnMut(&str) -> Vec<u8> + Send + 'static
    {
        let (host, mock) = Self::spawn_port(responder);
        (SerialTransport::new(host, "mock", settings), mock)
    }

    /// Like [`MockModem::spawn`], but hands back the host end of the pipe
    /// unwrapped so tests can put their own port in front of it.
    pub fn spawn_port<F>(mut responder: F) -> (DuplexStream, MockModem)
    where
        F: FnMut(&str) -> Vec<u8> + Send + 'static
    {
        let (host, mut device) = duplex(256 * 1024);
        let commands = Arc::new(Mutex::new(Vec::new()));
        let received = Arc::new(Mutex::new(Vec::new()));
        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let handle = {
            let commands = commands.clone();
            let received = received.clone();
            tokio::spawn(async move {
                let mut pending = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    tokio::select! {
                        read = device.read(&mut chunk) => {
                            let n = match read {
                                Ok(0) | Err(_) => break,
                                Ok(n) => n
                            };
                            received.lock().unwrap().extend_from_slice(&chunk[..n]);
                            pending.extend_from_slice(&chunk[..n]);

                            while let Some(end) = pending.iter().position(|&b| b == b'\r') {
                                let raw: Vec<u8> = pending.drain(..=end).collect();
                                let command = String::from_utf8_lossy(&raw[..raw.len() - 1]).to_string();
                                commands.lock().unwrap().push(command.clone());

                                let reply = responder(&command);
                                if !reply.is_empty() && device.write_all(&reply).await.is_err() {
                                    return;
                                }
                            }
                        },
                        Some(data) = inject_rx.recv() => {
                            if device.write_all(&data).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            })
        };

        (host, MockModem { commands, received, inject_tx, handle })
    }

    /// A device that acknowledges every command with `OK`.
    pub fn always_ok() -> (SerialTransport<DuplexStream>, MockModem) {
        Self::spawn(|_| b"\r\nOK\r\n".to_vec())
    }

    /// A device that rejects every command with `ERROR`.
    pub fn always_error() -> (SerialTransport<DuplexStream>, MockModem) {
        Self::spawn(|_| b"\r\nERROR\r\n".to_vec())
    }

    /// Writes unsolicited bytes towards the host, e.g. RING and caller ID lines.
    pub fn inject(&self, data: &[u8]) {
        let _ = self.inject_tx.send(data.to_vec());
    }

    /// Every command seen so far, without the CR terminator.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Every raw byte the host wrote.
    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for MockModem {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Answers voice commands the way the modem would, streaming `audio` after
/// `AT+VRX`. End of receive gets `<DLE><ETX>` from a USR and `OK` from a Conexant.
pub fn voice_responder(audio: Vec<u8>) -> impl FnMut(&str) -> Vec<u8> + Send + 'static {
    move |command| match command {
        commands::ENTER_VOICE_RECEIVE_STATE => {
            let mut reply = b"\r\nCONNECT\r\n".to_vec();
            reply.extend_from_slice(&audio);
            reply
        },
        commands::ENTER_VOICE_TRANSMIT_STATE => b"\r\nCONNECT\r\n".to_vec(),
        "\u{10}!" => b"\x10\x03".to_vec(),
        "\u{10}\u{10}\u{10}!" => b"\r\nOK\r\n".to_vec(),
        c if c.starts_with("AT") => b"\r\nOK\r\n".to_vec(),

        // End of transmit arrives glued to the audio written before it.
        c if c.ends_with("\u{10}\u{3}") => b"\r\nOK\r\n".to_vec(),

        // Stray CRs inside transmitted audio.
        _ => Vec::new()
    }
}
