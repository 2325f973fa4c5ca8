use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_serial::SerialStream;
use tracing::{debug, info, warn};
use crate::config::ModemConfig;
use crate::modem::caller_id::{CallerHandler, DefaultCallerPolicy, PartialCallerPolicy};
use crate::modem::ingester::CallerIdIngester;
use crate::modem::profile::ChipsetProfile;
use crate::modem::ring::RingSignal;
use crate::modem::transport::{ReadCanceller, SerialPortIo, SerialTransport, TransportSettings};
use crate::modem::types::ModemError;

pub mod audio;
pub mod caller_id;
pub mod commands;
pub mod detector;
pub mod dle;
pub mod ingester;
pub mod keypress;
pub mod profile;
pub mod ring;
pub mod session;
pub mod transport;
pub mod types;
mod buffer;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Clone)]
pub struct ModemSettings {

    /// How long the ingester holds the session lock per read.
    pub poll_interval: Duration,

    /// Name given to callers whose telco sent a number but no name.
    pub default_caller_name: String
}
impl Default for ModemSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            default_caller_name: "Unknown".to_string()
        }
    }
}

/// A detected voice modem: the shared transport, its chipset profile and the
/// caller ID ingester feeding off it.
pub struct Modem<P: SerialPortIo = SerialStream> {
    transport: Arc<Mutex<SerialTransport<P>>>,
    canceller: ReadCanceller,
    profile: ChipsetProfile,
    settings: ModemSettings,
    ring: RingSignal,
    ingester: Option<CallerIdIngester>
}

impl Modem<SerialStream> {

    /// Opens the configured serial device, or probes every port the OS reports
    /// when none is configured, and returns the first detected voice modem.
    pub async fn open(config: &ModemConfig) -> Result<Self, ModemError> {
        let transport_settings = TransportSettings {
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout()
        };

        if let Some(device) = &config.device {
            let transport = SerialTransport::open(device, config.baud, transport_settings)?;
            return Self::from_transport(transport, config.settings()).await;
        }

        let ports = tokio_serial::available_ports()
            .map_err(|source| ModemError::PortUnavailable { port: "(auto detect)".to_string(), source })?;

        info!("No modem device configured, probing {} serial port(s)", ports.len());
        for port in ports {
            let transport = match SerialTransport::open(&port.port_name, config.baud, transport_settings) {
                Ok(transport) => transport,
                Err(e) => {
                    debug!("Skipping {}: {}", port.port_name, e);
                    continue;
                }
            };
            match Self::from_transport(transport, config.settings()).await {
                Ok(modem) => return Ok(modem),
                Err(e) => debug!("No usable modem on {}: {}", port.port_name, e)
            }
        }

        Err(ModemError::NoModemFound("any serial port".to_string()))
    }
}

impl<P: SerialPortIo> Modem<P> {

    /// Detects and initialises the modem behind an already open transport.
    pub async fn from_transport(mut transport: SerialTransport<P>, settings: ModemSettings) -> Result<Self, ModemError> {
        let profile = detector::detect(&mut transport).await?;
        detector::initialize(&mut transport, &profile).await;
        Ok(Self::new(transport, profile, settings))
    }

    pub(crate) fn new(transport: SerialTransport<P>, profile: ChipsetProfile, settings: ModemSettings) -> Self {
        Self {
            canceller: transport.canceller(),
            transport: Arc::new(Mutex::new(transport)),
            profile,
            settings,
            ring: RingSignal::new(),
            ingester: None
        }
    }

    pub fn profile(&self) -> &ChipsetProfile {
        &self.profile
    }

    pub fn ring_signal(&self) -> RingSignal {
        self.ring.clone()
    }

    pub fn is_listening(&self) -> bool {
        self.ingester.as_ref().is_some_and(|ingester| ingester.is_running())
    }

    /// Starts delivering caller records to `handler`, with the default
    /// treatment of incomplete caller ID.
    pub fn start(&mut self, handler: CallerHandler) {
        let policy = DefaultCallerPolicy {
            default_name: self.settings.default_caller_name.clone()
        };
        self.start_with_policy(handler, Arc::new(policy));
    }

    pub fn start_with_policy(&mut self, handler: CallerHandler, policy: Arc<dyn PartialCallerPolicy>) {
        if self.is_listening() {
            warn!("Caller ID ingester is already running");
            return;
        }

        self.ingester = Some(CallerIdIngester::spawn(
            self.transport.clone(),
            self.ring.clone(),
            handler,
            policy,
            self.settings.poll_interval
        ));
    }

    /// Stops the caller ID ingester. Does nothing if it isn't running.
    pub async fn stop(&mut self) {
        if let Some(mut ingester) = self.ingester.take() {
            self.canceller.cancel();
            ingester.stop().await;
        }
    }

    /// Stops the ingester and closes the serial port. Safe to call more than once.
    pub async fn close(&mut self) {
        self.stop().await;
        self.canceller.cancel();
        self.transport.lock().await.close();
    }
}
