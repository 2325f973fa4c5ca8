use std::path::PathBuf;
use std::time::Duration;
use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use tracing::{debug, error, info, warn};
use crate::config::VoiceMailConfig;
use crate::database::CallDatabase;
use crate::indicators::Indicators;
use crate::modem::caller_id::CallerRecord;
use crate::modem::session::CallSession;
use crate::modem::transport::SerialPortIo;

/// Records caller messages and runs the voice messaging menu on an answered call.
pub struct VoiceMail {
    config: VoiceMailConfig,
    db: CallDatabase,
    indicators: Indicators,
    max_duration: Duration
}
impl VoiceMail {
    pub fn new(config: VoiceMailConfig, db: CallDatabase, indicators: Indicators, max_duration: Duration) -> Self {
        Self { config, db, indicators, max_duration }
    }

    fn message_path(&self, call_no: i64, record: &CallerRecord, now: NaiveDateTime) -> PathBuf {
        self.config.message_folder.join(format!(
            "{}_{}_{}_{}.wav",
            call_no,
            record.number,
            record.name.replace('_', "-"),
            now.format("%m%d%y_%H%M")
        ))
    }

    /// Offers the caller a menu: `1` leaves a message, `0` ends the call and
    /// anything else replays the menu, up to the configured number of tries.
    pub async fn voice_messaging_menu<P: SerialPortIo>(&self, session: &mut CallSession<P>, call_no: i64, record: &CallerRecord) {
        self.indicators.message.blink(None).await;

        let mut recorded = false;
        let mut tries = 0;
        while tries < self.config.menu_max_tries {
            session.play_audio(&self.config.menu_file).await;
            let Some(digit) = session.wait_for_keypress(self.config.menu_wait()).await else {
                break;
            };

            match digit {
                '1' => {
                    self.record_message(session, call_no, record).await;
                    recorded = true;
                    break;
                },
                '0' => break,
                _ => {
                    debug!("Invalid menu response {:?}", digit);
                    session.play_audio(&self.config.invalid_response_file).await;
                    tries += 1;
                }
            }
        }

        session.play_audio(&self.config.goodbye_file).await;
        if !recorded {
            self.reset_message_indicator().await;
        }
    }

    /// Prompts the caller and records a message. Returns the new message
    /// number if one was saved.
    pub async fn record_message<P: SerialPortIo>(&self, session: &mut CallSession<P>, call_no: i64, record: &CallerRecord) -> Option<i64> {
        let path = self.message_path(call_no, record, Local::now().naive_local());
        session.play_audio(&self.config.leave_message_file).await;

        self.indicators.message.turn_on().await;
        let saved = session.record_audio(&path, true, self.max_duration).await;

        let msg_no = if saved {
            match self.db.add_message(call_no, &path).await {
                Ok(msg_no) => {
                    info!("Saved message #{} from {}", msg_no, record.number);
                    Some(msg_no)
                },
                Err(e) => {
                    error!("Failed to store message {}: {:?}", path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        self.reset_message_indicator().await;
        msg_no
    }

    /// Deletes a message and its recording.
    pub async fn delete_message(&self, msg_no: i64) -> Result<bool> {
        let Some(filename) = self.db.delete_message(msg_no).await? else {
            return Ok(false);
        };
        if let Err(e) = std::fs::remove_file(&filename) {
            warn!("Failed to remove message file {}: {}", filename, e);
        }

        self.reset_message_indicator().await;
        Ok(true)
    }

    pub async fn reset_message_indicator(&self) {
        match self.db.unplayed_count().await {
            Ok(unplayed) => {
                debug!("Resetting message indicator to show {} unplayed message(s)", unplayed);
                self.indicators.show_unplayed(unplayed).await;
            },
            Err(e) => error!("Failed to count unplayed messages: {:?}", e)
        }
    }
}
