use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};
use crate::modem::commands;
use crate::modem::dle::{DleDecoder, DleEvent};
use crate::modem::session::CallSession;
use crate::modem::transport::SerialPortIo;
use crate::modem::types::StopReason;

fn abort_reason(event: DleEvent) -> Option<StopReason> {
    match event {
        DleEvent::LocalOffHook => Some(StopReason::LocalOffHook),
        DleEvent::Ring => Some(StopReason::Ring),
        DleEvent::BusyTone => Some(StopReason::BusyTone),
        DleEvent::Silence => Some(StopReason::Silence),
        DleEvent::EndOfData => Some(StopReason::EndOfData),
        _ => None
    }
}

impl<P: SerialPortIo> CallSession<P> {

    /// Waits for the caller to press a key and returns it.
    ///
    /// `None` if nothing was pressed within `timeout`, or the wait was cut
    /// short by a hook, busy, ring or silence report from the modem.
    pub async fn wait_for_keypress(&mut self, timeout: Duration) -> Option<char> {
        info!("Waiting up to {:?} for a keypress", timeout);

        let profile = self.profile;
        let steps = [
            (profile.enter_voice_mode, "enter voice mode"),
            (profile.enable_silence_detection_10s, "enable silence detection"),
            (commands::TAD_OFF_HOOK, "go off hook in answering device mode")
        ];
        for (command, description) in steps {
            if !self.transport.execute(command).await {
                error!("Failed to wait for a keypress, modem could not {}", description);
                return None;
            }
        }

        let deadline = Instant::now() + timeout;
        let read_timeout = self.transport.read_timeout();
        let mut decoder = DleDecoder::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                info!("No keypress within {:?}", timeout);
                return None;
            }

            let byte = match self.transport.read_chunk(1, remaining.min(read_timeout)).await {
                Ok(byte) => byte,
                Err(e) => {
                    error!("Keypress wait interrupted: {}", e);
                    return None;
                }
            };

            let decoded = decoder.decode(&byte);
            for (_, event) in &decoded.events {
                if let Some(reason) = abort_reason(*event) {
                    info!("Keypress wait aborted: {}", reason);
                    return None;
                }
                if let DleEvent::Dtmf(digit) = event {
                    debug!("DTMF digit {:?}", digit);
                    return Some(*digit);
                }
            }

            // Some modems report digits unshielded.
            if let Some(&digit) = decoded.samples.iter().find(|b| b.is_ascii_digit()) {
                debug!("Bare digit {:?}", digit as char);
                return Some(digit as char);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::dle::DLE;
    use crate::modem::profile::{ChipsetProfile, ModemModel};
    use crate::modem::testing::MockModem;
    use crate::modem::transport::SerialTransport;
    use crate::modem::{Modem, ModemSettings};

    fn modem_with<P: SerialPortIo>(transport: SerialTransport<P>) -> Modem<P> {
        Modem::new(transport, ChipsetProfile::for_model(ModemModel::Conexant), ModemSettings::default())
    }

    /// Replies OK to everything, appending `after_off_hook` to the `AT+VLS=1` response.
    fn off_hook_responder(after_off_hook: &'static [u8]) -> impl FnMut(&str) -> Vec<u8> + Send + 'static {
        let mut picked_up = false;
        move |command| {
            let mut reply = b"\r\nOK\r\n".to_vec();
            if command == commands::TAD_OFF_HOOK {
                // The first off hook belongs to pick up, the second to the keypress wait.
                if picked_up {
                    reply.extend_from_slice(after_off_hook);
                }
                picked_up = true;
            }
            reply
        }
    }

    #[tokio::test]
    async fn test_dtmf_digit() {
        let (transport, mock) = MockModem::spawn(off_hook_responder(&[DLE, b'/', DLE, b'1', DLE, b'~']));
        let modem = modem_with(transport);
        let mut session = modem.pick_up().await.unwrap();

        assert_eq!(session.wait_for_keypress(Duration::from_secs(5)).await, Some('1'));
        assert!(session.hang_up().await);
        assert!(mock.commands().contains(&"AT+VSD=0,100".to_string()));
    }

    #[tokio::test]
    async fn test_bare_digit() {
        let (transport, _mock) = MockModem::spawn(off_hook_responder(b"0"));
        let modem = modem_with(transport);
        let mut session = modem.pick_up().await.unwrap();

        assert_eq!(session.wait_for_keypress(Duration::from_secs(5)).await, Some('0'));
        assert!(session.hang_up().await);
    }

    #[tokio::test]
    async fn test_busy_tone_aborts() {
        let (transport, _mock) = MockModem::spawn(off_hook_responder(&[DLE, b'b', DLE, b'5']));
        let modem = modem_with(transport);
        let mut session = modem.pick_up().await.unwrap();

        assert_eq!(session.wait_for_keypress(Duration::from_secs(5)).await, None);
        assert!(session.hang_up().await);
    }

    #[tokio::test]
    async fn test_ring_aborts() {
        let (transport, _mock) = MockModem::spawn(off_hook_responder(&[DLE, b'R']));
        let modem = modem_with(transport);
        let mut session = modem.pick_up().await.unwrap();

        assert_eq!(session.wait_for_keypress(Duration::from_secs(5)).await, None);
        assert!(session.hang_up().await);
    }

    #[tokio::test]
    async fn test_timeout() {
        let (transport, _mock) = MockModem::spawn(off_hook_responder(b""));
        let modem = modem_with(transport);
        let mut session = modem.pick_up().await.unwrap();

        let started = Instant::now();
        assert_eq!(session.wait_for_keypress(Duration::from_millis(300)).await, None);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(session.hang_up().await);
    }
}
