use std::sync::Arc;
use std::time::Duration;
use chrono::Local;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use crate::modem::caller_id::{CallerHandler, CallerIdAccumulator, PartialCallerPolicy};
use crate::modem::ring::RingSignal;
use crate::modem::transport::{SerialPortIo, SerialTransport};
use crate::modem::types::{decode_line, ModemError};

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Background task turning unsolicited modem lines into caller records and ring pulses.
///
/// The session lock is only taken around each single poll read, so anything
/// queued on the lock gets the port within one poll interval.
pub struct CallerIdIngester {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>
}
impl CallerIdIngester {
    pub fn spawn<P: SerialPortIo>(
        transport: Arc<Mutex<SerialTransport<P>>>,
        ring: RingSignal,
        handler: CallerHandler,
        policy: Arc<dyn PartialCallerPolicy>,
        poll_interval: Duration
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            Self::run(transport, ring, handler, CallerIdAccumulator::new(policy), poll_interval, stop_rx).await;
        });

        info!("Caller ID ingester started (poll interval {:?})", poll_interval);
        Self { stop_tx, handle: Some(handle) }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the loop to exit and waits for it. Safe to call more than once.
    pub async fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let _ = self.stop_tx.send(true);
        match handle.await {
            Ok(()) => info!("Caller ID ingester stopped"),
            Err(e) => error!("Caller ID ingester task failed: {:?}", e)
        }
    }

    async fn run<P: SerialPortIo>(
        transport: Arc<Mutex<SerialTransport<P>>>,
        ring: RingSignal,
        handler: CallerHandler,
        mut accumulator: CallerIdAccumulator,
        poll_interval: Duration,
        mut stop_rx: watch::Receiver<bool>
    ) {
        loop {
            if *stop_rx.borrow() {
                break;
            }

            let read = tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                read = async {
                    let mut transport = transport.lock().await;
                    transport.read_line(poll_interval).await
                } => read
            };

            let line = match read {
                Ok(line) => line.map(|raw| decode_line(&raw)),
                Err(ModemError::Closed) => {
                    warn!("Serial port closed underneath the caller ID ingester");
                    break;
                },
                Err(e) => {
                    error!("Caller ID ingester read failed: {}", e);
                    tokio::select! {
                        _ = stop_rx.changed() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => continue
                    }
                }
            };

            let outcome = accumulator.process(line.as_deref(), Local::now().naive_local());
            if outcome.ring {
                debug!("RING");
                ring.pulse();
            }
            if let Some(record) = outcome.record {
                info!("Caller ID: {}", record);
                handler(record);
            }
        }
    }
}
