use tracing::{debug, info, warn};
use crate::modem::commands::{self, DEFAULT_COMMAND_TIMEOUT, OK};
use crate::modem::profile::{ChipsetProfile, ModemModel};
use crate::modem::transport::{SerialPortIo, SerialTransport};
use crate::modem::types::{decode_line, ModemError};

/// Identifies the modem attached to `transport` and returns its command profile.
/// Must run once per connection before anything else talks to the modem.
pub async fn detect<P: SerialPortIo>(transport: &mut SerialTransport<P>) -> Result<ChipsetProfile, ModemError> {
    info!("Looking for a modem on {}", transport.name());

    if !transport.execute(commands::ATTENTION).await {
        return Err(ModemError::NoModemFound(transport.name().to_string()));
    }

    let response = transport.send(commands::GET_PRODUCT_CODE, Some(OK), DEFAULT_COMMAND_TIMEOUT).await;
    if !response.ok {
        return Err(ModemError::NoModemFound(transport.name().to_string()));
    }

    let product_code = response.lines
        .iter()
        .map(|line| decode_line(line))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let profile = match ModemModel::from_product_code(&product_code) {
        Some(model) => ChipsetProfile::for_model(model),
        None => {
            warn!("Unrecognised modem product code {:?}, trying the generic voice profile", product_code);
            let profile = ChipsetProfile::for_model(ModemModel::Unknown);
            if !transport.execute(profile.enter_voice_mode).await {
                return Err(ModemError::UnsupportedModem(product_code));
            }
            profile
        }
    };

    info!("Detected {} modem (product code {:?}) on {}", profile.model, product_code, transport.name());
    Ok(profile)
}

/// Puts a freshly detected modem into the state the call handling expects.
/// Individual failures are logged but do not abort.
pub async fn initialize<P: SerialPortIo>(transport: &mut SerialTransport<P>, profile: &ChipsetProfile) {
    let steps = [
        (commands::RESET, "reset to factory defaults"),
        (commands::ENABLE_VERBOSE_CODES, "enable verbose result codes"),
        (commands::DISABLE_ECHO, "disable command echo"),
        (commands::ENABLE_FORMATTED_CID, "enable formatted caller ID"),
        (commands::DISABLE_SPEAKER, "disable the internal speaker"),
        (commands::STORE_PROFILE, "store the profile")
    ];
    for (command, description) in steps {
        if !transport.execute(command).await {
            warn!("Modem failed to {}", description);
        }
    }

    let settings = transport.send(profile.get_settings, Some(OK), DEFAULT_COMMAND_TIMEOUT).await;
    for line in settings.lines.iter().map(|line| decode_line(line)).filter(|line| !line.is_empty()) {
        debug!("Modem setting: {}", line);
    }
}
