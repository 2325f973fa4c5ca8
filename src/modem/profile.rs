use std::fmt::{Display, Formatter};
use std::time::Duration;
use crate::modem::commands;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemModel {
    Usr5637,
    Conexant,
    Mt9234mu,
    Unknown
}
impl ModemModel {

    /// Matches the response to `ATI0` against the known product codes.
    pub fn from_product_code(response: &str) -> Option<Self> {
        if response.contains("5601") {
            Some(ModemModel::Usr5637)
        } else if response.contains("56000") {
            Some(ModemModel::Conexant)
        } else if response.contains("MT9234MU") {
            Some(ModemModel::Mt9234mu)
        } else {
            None
        }
    }
}
impl Display for ModemModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ModemModel::Usr5637 => write!(f, "US Robotics 5637"),
            ModemModel::Conexant => write!(f, "Conexant"),
            ModemModel::Mt9234mu => write!(f, "MultiTech MT9234MU"),
            ModemModel::Unknown => write!(f, "Unknown")
        }
    }
}

/// Range of 8-bit sample values that count as silence.
///
/// Every known chipset is configured for offset-binary 8-bit PCM, where the
/// zero level sits at 127.5, so silence is 127 or 128 give or take one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceBand {
    pub min: u8,
    pub max: u8
}
impl SilenceBand {
    pub const OFFSET_BINARY: SilenceBand = SilenceBand { min: 126, max: 129 };

    pub fn is_silent(&self, samples: &[u8]) -> bool {
        samples.iter().all(|&sample| sample >= self.min && sample <= self.max)
    }
}

/// Command variants and DLE sequences for one modem family. Selected once when
/// the modem is detected and then passed to everything that talks to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipsetProfile {
    pub model: ModemModel,
    pub enter_voice_mode: &'static str,
    pub get_settings: &'static str,
    pub set_voice_compression: &'static str,
    pub disable_silence_detection: &'static str,
    pub enable_silence_detection_5s: &'static str,
    pub enable_silence_detection_10s: &'static str,

    /// DTE to DCE: end of transmitted voice data.
    pub end_voice_tx: &'static str,

    /// DTE to DCE: stop the receive data state.
    pub end_voice_rx: &'static str,

    /// Response that terminates `end_voice_rx`.
    pub end_voice_rx_response: &'static str,

    /// Delay between transmitted audio chunks so the modem buffer isn't overrun.
    pub tx_pacing: Duration,
    pub silence: SilenceBand
}

impl ChipsetProfile {
    pub fn for_model(model: ModemModel) -> Self {
        match model {
            ModemModel::Usr5637 => Self::usr_5637(),
            ModemModel::Conexant => Self::conexant(),
            ModemModel::Mt9234mu => Self::mt9234mu(),
            ModemModel::Unknown => Self { model: ModemModel::Unknown, ..Self::usr_5637() }
        }
    }

    fn usr_5637() -> Self {
        Self {
            model: ModemModel::Usr5637,
            enter_voice_mode: commands::ENTER_VOICE_MODE,
            get_settings: commands::GET_MODEM_SETTINGS,
            set_voice_compression: "AT+VSM=128,8000",
            disable_silence_detection: "AT+VSD=128,0",
            enable_silence_detection_5s: "AT+VSD=128,50",
            enable_silence_detection_10s: "AT+VSD=128,100",
            end_voice_tx: "\u{10}\u{3}",
            end_voice_rx: "\u{10}!",

            // The modem answers with <DLE><ETX>; the DLE is stripped when decoding.
            end_voice_rx_response: "\u{3}",
            tx_pacing: Duration::from_millis(100),
            silence: SilenceBand::OFFSET_BINARY
        }
    }

    fn conexant() -> Self {
        Self {
            model: ModemModel::Conexant,
            enter_voice_mode: commands::ENTER_VOICE_MODE,
            get_settings: commands::GET_MODEM_SETTINGS,
            set_voice_compression: "AT+VSM=1,8000,0,0",
            disable_silence_detection: "AT+VSD=0,0",
            enable_silence_detection_5s: "AT+VSD=0,50",
            enable_silence_detection_10s: "AT+VSD=0,100",
            end_voice_tx: "\u{10}\u{10}\u{10}\u{3}",
            end_voice_rx: "\u{10}\u{10}\u{10}!",
            end_voice_rx_response: "OK",
            tx_pacing: Duration::from_millis(30),
            silence: SilenceBand::OFFSET_BINARY
        }
    }

    fn mt9234mu() -> Self {
        Self {
            model: ModemModel::Mt9234mu,

            // Trailing <CR><ESC> aborts the paged output these commands produce.
            enter_voice_mode: "AT+FCLASS=8\r\u{1b}",
            get_settings: "AT&V\r\u{1b}",
            end_voice_rx_response: "OK",
            tx_pacing: Duration::from_millis(30),
            ..Self::usr_5637()
        }
    }
}
