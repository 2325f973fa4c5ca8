use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};
use crate::modem::commands::{self, GO_ON_HOOK, TAD_OFF_HOOK};
use crate::modem::profile::ChipsetProfile;
use crate::modem::transport::{ReadCanceller, SerialPortIo, SerialTransport};
use crate::modem::Modem;

/// Exclusive ownership of the modem for the duration of one answered call.
///
/// Holding a `CallSession` means holding the session lock. The lock is given
/// back when the session is consumed by [`CallSession::hang_up`], or dropped.
pub struct CallSession<P: SerialPortIo> {
    pub(crate) transport: OwnedMutexGuard<SerialTransport<P>>,
    pub(crate) profile: ChipsetProfile,
    canceller: ReadCanceller,
    hung_up: bool
}

impl<P: SerialPortIo> Modem<P> {

    /// Takes the line off hook in answering machine mode.
    ///
    /// Interrupts the ingester's pending poll, then waits for the session lock.
    /// On any setup failure the lock is released again and `None` is returned.
    pub async fn pick_up(&self) -> Option<CallSession<P>> {
        self.canceller.cancel();
        let mut transport = self.transport.clone().lock_owned().await;

        let steps = [
            (self.profile.enter_voice_mode, "enter voice mode"),
            (self.profile.disable_silence_detection, "disable silence detection"),
            (TAD_OFF_HOOK, "go off hook in answering device mode")
        ];
        for (command, description) in steps {
            if !transport.execute(command).await {
                error!("Failed to pick up, modem could not {}", description);
                return None;
            }
        }

        info!("Picked up the line on {}", transport.name());
        Some(CallSession {
            transport,
            profile: self.profile,
            canceller: self.canceller.clone(),
            hung_up: false
        })
    }
}

impl<P: SerialPortIo> CallSession<P> {
    pub fn profile(&self) -> &ChipsetProfile {
        &self.profile
    }

    /// Puts the line back on hook and releases the session lock.
    ///
    /// The lock is released whether or not the modem acknowledged; the return
    /// value only reports the on-hook command's own outcome.
    pub async fn hang_up(mut self) -> bool {
        self.canceller.cancel();
        if let Err(e) = self.transport.discard_buffers() {
            warn!("Failed to discard serial buffers before hanging up: {}", e);
        }

        self.hung_up = true;
        let ok = self.transport.execute(GO_ON_HOOK).await;
        if ok {
            info!("Hung up the line on {}", self.transport.name());
        } else {
            error!("Modem did not acknowledge {}", commands::GO_ON_HOOK);
        }
        ok
    }
}

impl<P: SerialPortIo> Drop for CallSession<P> {
    fn drop(&mut self) {
        if !self.hung_up {
            warn!("Call session on {} released without hanging up, the line may still be off hook", self.transport.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::profile::ModemModel;
    use crate::modem::testing::MockModem;
    use crate::modem::ModemSettings;

    fn modem_with<P: SerialPortIo>(transport: SerialTransport<P>) -> Modem<P> {
        Modem::new(transport, ChipsetProfile::for_model(ModemModel::Usr5637), ModemSettings::default())
    }

    #[tokio::test]
    async fn test_pick_up_and_hang_up() {
        let (transport, mock) = MockModem::always_ok();
        let modem = modem_with(transport);

        let session = modem.pick_up().await.expect("pick up should succeed");
        assert!(modem.transport.try_lock().is_err());

        assert!(session.hang_up().await);
        assert!(modem.transport.try_lock().is_ok());
        assert_eq!(mock.commands(), vec!["AT+FCLASS=8", "AT+VSD=128,0", "AT+VLS=1", "ATH0"]);
    }

    #[tokio::test]
    async fn test_hang_up_failure_still_releases_lock() {
        let (transport, _mock) = MockModem::spawn(|command| match command {
            GO_ON_HOOK => b"\r\nERROR\r\n".to_vec(),
            _ => b"\r\nOK\r\n".to_vec()
        });
        let modem = modem_with(transport);

        let session = modem.pick_up().await.unwrap();
        assert!(!session.hang_up().await);
        assert!(modem.transport.try_lock().is_ok());

        // A second call gets the lock straight away.
        let session = tokio::time::timeout(std::time::Duration::from_secs(1), modem.pick_up())
            .await
            .unwrap()
            .unwrap();
        assert!(!session.hang_up().await);
    }

    #[tokio::test]
    async fn test_failed_pick_up_releases_lock() {
        let (transport, mock) = MockModem::always_error();
        let modem = modem_with(transport);

        assert!(modem.pick_up().await.is_none());
        assert!(modem.transport.try_lock().is_ok());
        assert_eq!(mock.commands(), vec!["AT+FCLASS=8"]);
    }

    #[tokio::test]
    async fn test_pick_up_waits_for_ingester_poll() {
        let (transport, _mock) = MockModem::always_ok();
        let modem = modem_with(transport);

        // Simulate the ingester sitting in a long poll read.
        let reader = {
            let transport = modem.transport.clone();
            tokio::spawn(async move {
                let mut transport = transport.lock().await;
                transport.read_line(std::time::Duration::from_secs(30)).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let session = tokio::time::timeout(std::time::Duration::from_secs(2), modem.pick_up())
            .await
            .expect("pick up should cancel the pending read")
            .unwrap();
        assert!(reader.await.unwrap().unwrap().is_none());
        assert!(session.hang_up().await);
    }
}
