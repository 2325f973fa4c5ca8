use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use crate::modem::transport::{SerialPortIo, SerialTransport};
use crate::modem::types::{decode_line, CommandResponse};

// See http://support.usr.com/support/5637/5637-ug/ref_data.html
pub const ATTENTION: &str = "AT";
pub const RESET: &str = "ATZ";
pub const GET_PRODUCT_CODE: &str = "ATI0";
pub const GET_MODEM_SETTINGS: &str = "AT&V";
pub const DISABLE_ECHO: &str = "ATE0";
pub const ENABLE_VERBOSE_CODES: &str = "ATV1";
pub const ENABLE_FORMATTED_CID: &str = "AT+VCID=1";
pub const DISABLE_SPEAKER: &str = "ATM0";
pub const STORE_PROFILE: &str = "AT&W0";
pub const ENTER_VOICE_MODE: &str = "AT+FCLASS=8";
pub const ENTER_VOICE_RECEIVE_STATE: &str = "AT+VRX";
pub const ENTER_VOICE_TRANSMIT_STATE: &str = "AT+VTX";
pub const SEND_BEEP: &str = "AT+VTS=[900,900,120]";
pub const TAD_OFF_HOOK: &str = "AT+VLS=1";
pub const GO_ON_HOOK: &str = "ATH0";

pub const OK: &str = "OK";
pub const CONNECT: &str = "CONNECT";

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

impl<P: SerialPortIo> SerialTransport<P> {

    /// Writes `command` followed by CR and waits for `expected` on a line of its own.
    ///
    /// An `ERROR` line or running out of time yields `ok == false`; neither is raised.
    /// With `expected == None` nothing is read back. The caller must own the
    /// session lock, which is what makes `&mut self` available in the first place.
    pub async fn send(&mut self, command: &str, expected: Option<&str>, timeout: Duration) -> CommandResponse {
        debug!("{} -> {:?} (expecting {:?})", self.name(), command, expected);

        let mut payload = command.as_bytes().to_vec();
        payload.push(b'\r');
        if let Err(e) = self.write(&payload).await {
            error!("Failed to write {:?} to {}: {}", command, self.name(), e);
            return CommandResponse::failure(Vec::new());
        }

        let Some(expected) = expected else {
            return CommandResponse::success(Vec::new());
        };

        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Command {:?} timed out waiting for {:?}", command, expected);
                return CommandResponse::failure(lines);
            }

            let line = match self.read_line(remaining.min(self.read_timeout())).await {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(e) => {
                    error!("Failed reading response to {:?}: {}", command, e);
                    return CommandResponse::failure(lines);
                }
            };

            let response = decode_line(&line);
            if response == expected {
                return CommandResponse::success(lines);
            }

            let is_error = response.contains("ERROR");
            lines.push(line);
            if is_error {
                debug!("Command {:?} returned ERROR", command);
                return CommandResponse::failure(lines);
            }
        }
    }

    /// Sends a command expecting `OK` within the default timeout.
    pub async fn execute(&mut self, command: &str) -> bool {
        self.send(command, Some(OK), DEFAULT_COMMAND_TIMEOUT).await.ok
    }
}
