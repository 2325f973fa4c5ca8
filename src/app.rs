use std::future::Future;
use std::time::Duration;
use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_serial::SerialStream;
use tracing::{debug, error, info, warn};
use crate::config::{ActionConfig, AppConfig, CallAction};
use crate::database::CallDatabase;
use crate::indicators::Indicators;
use crate::modem::caller_id::{channel_handler, CallerRecord};
use crate::modem::transport::SerialPortIo;
use crate::modem::Modem;
use crate::screening::{CallScreener, Screening};
use crate::voice_mail::VoiceMail;

/// North American ring cadence: two seconds ringing, four silent.
const RING_CADENCE: Duration = Duration::from_secs(6);

/// How long without a ring before ringing is assumed to have stopped, one and
/// a half cadences.
const RING_WAIT: Duration = Duration::from_secs(RING_CADENCE.as_secs() * 3 / 2);

const APPROVED_BLINKS: u32 = 10;
const BLOCKED_BLINKS: u32 = 10;

/// Screens incoming callers and answers, records or ignores them.
pub struct CallAttendant<P: SerialPortIo = SerialStream> {
    config: AppConfig,
    modem: Modem<P>,
    db: CallDatabase,
    screener: CallScreener,
    voice_mail: VoiceMail,
    indicators: Indicators,
    caller_tx: UnboundedSender<CallerRecord>,
    caller_rx: UnboundedReceiver<CallerRecord>,
    ring_wait: Duration
}
impl<P: SerialPortIo> CallAttendant<P> {
    pub async fn new(config: AppConfig, modem: Modem<P>) -> Result<Self> {
        let db = CallDatabase::connect(&config.database)
            .await
            .with_context(|| format!("Failed to open database {}", config.database.path.display()))?;

        let screener = CallScreener::new(&config.screening, db.clone())?;
        let indicators = Indicators::new(&config.gpio);
        let voice_mail = VoiceMail::new(
            config.voice_mail.clone(),
            db.clone(),
            indicators.clone(),
            config.modem.record_max_duration()
        );
        voice_mail.reset_message_indicator().await;

        let (caller_tx, caller_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            modem,
            db,
            screener,
            voice_mail,
            indicators,
            caller_tx,
            caller_rx,
            ring_wait: RING_WAIT
        })
    }

    /// Processes callers one at a time until `shutdown` resolves or handling
    /// a caller fails, then releases the modem and LEDs.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.modem.start(channel_handler(self.caller_tx.clone()));
        let ring_blinker = self.spawn_ring_blinker();

        info!("Waiting for call...");
        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("User initiated shutdown");
                    break Ok(());
                },
                Some(record) = self.caller_rx.recv() => {
                    if let Err(e) = self.handle_caller(record).await {
                        error!("Error handling caller: {:?}", e);
                        break Err(e);
                    }
                    info!("Waiting for next call...");
                }
            }
        };

        ring_blinker.abort();
        self.shutdown().await;
        result
    }

    fn spawn_ring_blinker(&self) -> JoinHandle<()> {
        let ring = self.modem.ring_signal();
        let led = self.indicators.ring.clone();
        tokio::spawn(async move {
            loop {
                if ring.wait(Duration::from_secs(1)).await {
                    led.blink(Some(1)).await;
                }
            }
        })
    }

    async fn handle_caller(&mut self, record: CallerRecord) -> Result<()> {
        info!("Incoming call from {}", record);

        let screening = self.screener.screen(&record).await?;
        match screening {
            Screening::Permitted(_) => self.indicators.approved.blink(Some(APPROVED_BLINKS)).await,
            Screening::Blocked(_) => self.indicators.blocked.blink(Some(BLOCKED_BLINKS)).await,
            Screening::Screened => {}
        }

        let call_no = self.db.log_caller(&record, screening.action(), screening.reason()).await?;
        info!("--> {} {}", record.number, screening);

        let actions = match screening {
            Screening::Permitted(_) => self.config.permitted.clone(),
            Screening::Blocked(_) => self.config.blocked.clone(),
            Screening::Screened => self.config.screened.clone()
        };

        if self.wait_for_rings(actions.rings_before_answer).await && actions.has(CallAction::Answer) {
            self.answer_call(&actions, call_no, &record).await;
        } else {
            self.ignore_call(&record);
        }
        Ok(())
    }

    /// Waits until `rings_before_answer` rings have been seen, counting the
    /// one that delivered the caller ID. False if ringing stops or another
    /// caller arrives first.
    async fn wait_for_rings(&self, rings_before_answer: u32) -> bool {
        let ring = self.modem.ring_signal();
        let mut ring_count = 1;
        let mut last_ring = Instant::now();

        while ring_count < rings_before_answer {
            if !self.caller_rx.is_empty() {
                info!("Another call has come in");
                return false;
            }

            if ring.wait(Duration::from_secs(1)).await {
                ring_count += 1;
                last_ring = Instant::now();
                debug!("Ring count: {}", ring_count);
            } else if last_ring.elapsed() > self.ring_wait {
                info!("Ringing stopped: caller hung up or callee answered");
                return false;
            }
        }
        true
    }

    async fn answer_call(&self, actions: &ActionConfig, call_no: i64, record: &CallerRecord) {
        let Some(mut session) = self.modem.pick_up().await else {
            error!("Failed to answer call #{}", call_no);
            return;
        };

        if actions.has(CallAction::Greeting) {
            info!(">> Playing greeting...");
            session.play_audio(&actions.greeting_file).await;
        }

        if actions.has(CallAction::RecordMessage) {
            info!(">> Recording message...");
            self.voice_mail.record_message(&mut session, call_no, record).await;
        } else if actions.has(CallAction::VoiceMail) {
            info!(">> Starting voice mail...");
            self.voice_mail.voice_messaging_menu(&mut session, call_no, record).await;
        }

        if !session.hang_up().await {
            warn!("Modem did not confirm hang up after call #{}", call_no);
        }
    }

    fn ignore_call(&self, record: &CallerRecord) {
        debug!("Ignoring call from {}", record.number);
    }

    async fn shutdown(&mut self) {
        info!("Shutting down...");
        self.modem.close().await;
        self.indicators.all_off().await;
        info!("Shutdown finished");
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use tempfile::TempDir;
    use super::*;
    use crate::database::tests::caller;
    use crate::modem::audio::write_voice_samples;
    use crate::modem::commands;
    use crate::modem::dle::{DLE, ETX};
    use crate::modem::profile::{ChipsetProfile, ModemModel};
    use crate::modem::testing::{voice_responder, MockModem};
    use crate::modem::ModemSettings;
    use tokio::io::DuplexStream;

    fn test_config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.gpio.enabled = false;
        config.voice_mail.menu_wait_secs = 1;
        config.resolve_paths(dir);

        std::fs::create_dir_all(dir.join("resources")).unwrap();
        std::fs::create_dir_all(&config.voice_mail.message_folder).unwrap();
        for prompt in [&config.screened.greeting_file, &config.voice_mail.leave_message_file] {
            write_voice_samples(prompt, &[0x80u8; 200]).unwrap();
        }
        config
    }

    async fn attendant(dir: &TempDir, audio: Vec<u8>) -> (CallAttendant<DuplexStream>, MockModem) {
        let (transport, mock) = MockModem::spawn(voice_responder(audio));
        let settings = ModemSettings {
            poll_interval: Duration::from_millis(100),
            ..ModemSettings::default()
        };
        let modem = Modem::new(transport, ChipsetProfile::for_model(ModemModel::Usr5637), settings);
        let attendant = CallAttendant::new(test_config(dir.path()), modem).await.unwrap();
        (attendant, mock)
    }

    #[tokio::test]
    async fn test_single_ring_answers_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (attendant, _mock) = attendant(&dir, Vec::new()).await;
        assert!(attendant.wait_for_rings(0).await);
        assert!(attendant.wait_for_rings(1).await);
    }

    #[tokio::test]
    async fn test_rings_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let (attendant, _mock) = attendant(&dir, Vec::new()).await;

        let ring = attendant.modem.ring_signal();
        let pulser = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(200)).await;
                ring.pulse();
            }
        });

        assert!(attendant.wait_for_rings(3).await);
        pulser.abort();
    }

    #[tokio::test]
    async fn test_ringing_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut attendant, _mock) = attendant(&dir, Vec::new()).await;
        attendant.ring_wait = Duration::from_millis(500);

        let started = Instant::now();
        assert!(!attendant.wait_for_rings(4).await);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_queued_caller_preempts_rings() {
        let dir = tempfile::tempdir().unwrap();
        let (attendant, _mock) = attendant(&dir, Vec::new()).await;

        attendant.caller_tx.send(caller("123", "Next")).unwrap();
        assert!(!attendant.wait_for_rings(4).await);
    }

    #[tokio::test]
    async fn test_screened_caller_is_greeted_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut message = vec![0x40u8; 600];
        message.extend_from_slice(&[DLE, ETX]);
        let (mut attendant, mock) = attendant(&dir, message).await;

        attendant.handle_caller(caller("7145551234", "Caller")).await.unwrap();

        let commands = mock.commands();
        let transmits = commands.iter().filter(|c| *c == commands::ENTER_VOICE_TRANSMIT_STATE).count();
        assert_eq!(transmits, 2);
        assert!(commands.contains(&commands::ENTER_VOICE_RECEIVE_STATE.to_string()));
        assert_eq!(commands.last().map(String::as_str), Some(commands::GO_ON_HOOK));
        assert_eq!(attendant.db.unplayed_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_permitted_caller_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (mut attendant, mock) = attendant(&dir, Vec::new()).await;

        let record = caller("8055554567", "Friend");
        attendant.db.add_whitelist(&record, "Family").await.unwrap();
        attendant.handle_caller(record).await.unwrap();

        assert!(!mock.commands().contains(&commands::TAD_OFF_HOOK.to_string()));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (attendant, mock) = attendant(&dir, Vec::new()).await;
        let db = attendant.db.clone();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(attendant.run(async move {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        mock.inject(b"RING\r\nDATE = 0801\r\nTIME = 1801\r\nNMBR = 8055554567\r\nNAME = V123456789012345\r\nRING\r\n");
        tokio::time::sleep(Duration::from_millis(500)).await;

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap().unwrap();

        let calls = db.recent_calls(10).await.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].number, "8055554567");
        assert_eq!(calls[0].action, "Blocked");
        assert_eq!(calls[0].reason, "Telemarketer Caller ID");

        // Blocked callers are answered into voice mail and hung up on.
        let commands = mock.commands();
        assert!(commands.contains(&commands::TAD_OFF_HOOK.to_string()));
        assert_eq!(commands.last().map(String::as_str), Some(commands::GO_ON_HOOK));
    }
}
