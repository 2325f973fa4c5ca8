use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use crate::config::GpioConfig;

#[cfg(feature = "gpio")]
use anyhow::Result;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

const BLINK_ON: Duration = Duration::from_millis(500);
const BLINK_OFF: Duration = Duration::from_millis(200);
const PULSE_PERIOD: Duration = Duration::from_secs(1);

struct LedState {
    lit: bool,

    #[cfg(feature = "gpio")]
    pin: Option<OutputPin>
}
impl LedState {
    fn set(&mut self, lit: bool) {
        self.lit = lit;

        #[cfg(feature = "gpio")]
        if let Some(pin) = self.pin.as_mut() {
            if lit {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
    }
}

/// A single status LED. Without a GPIO pin behind it, state changes are
/// tracked and logged only.
#[derive(Clone)]
pub struct Led {
    name: &'static str,
    state: Arc<Mutex<LedState>>,
    blinker: Arc<Mutex<Option<JoinHandle<()>>>>
}
impl Led {
    fn disabled(name: &'static str) -> Self {
        Self::with_state(name, LedState {
            lit: false,

            #[cfg(feature = "gpio")]
            pin: None
        })
    }

    #[cfg(feature = "gpio")]
    fn gpio(name: &'static str, gpio: &Gpio, pin: u8) -> Result<Self> {
        let pin = gpio.get(pin)?.into_output_low();
        Ok(Self::with_state(name, LedState { lit: false, pin: Some(pin) }))
    }

    fn with_state(name: &'static str, state: LedState) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(state)),
            blinker: Arc::new(Mutex::new(None))
        }
    }

    async fn stop_blinking(&self) {
        if let Some(handle) = self.blinker.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    pub async fn turn_on(&self) {
        self.stop_blinking().await;
        debug!("{} LED on", self.name);
        self.state.lock().await.set(true);
    }

    pub async fn turn_off(&self) {
        self.stop_blinking().await;
        debug!("{} LED off", self.name);
        self.state.lock().await.set(false);
    }

    #[cfg(test)]
    pub async fn is_lit(&self) -> bool {
        self.state.lock().await.lit
    }

    /// Blinks in the background, `max_times` times or until the LED is next
    /// switched when `None`. The LED is left off afterwards.
    pub async fn blink(&self, max_times: Option<u32>) {
        self.spawn_blinker(BLINK_ON, BLINK_OFF, max_times).await;
    }

    /// Slow indefinite blink, shown while unplayed messages are waiting.
    pub async fn pulse(&self) {
        self.spawn_blinker(PULSE_PERIOD, PULSE_PERIOD, None).await;
    }

    async fn spawn_blinker(&self, on: Duration, off: Duration, max_times: Option<u32>) {
        self.stop_blinking().await;
        debug!("{} LED blinking", self.name);

        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            let mut count = 0;
            while max_times.map_or(true, |max| count < max) {
                state.lock().await.set(true);
                tokio::time::sleep(on).await;
                state.lock().await.set(false);
                tokio::time::sleep(off).await;
                count += 1;
            }
        });
        *self.blinker.lock().await = Some(handle);
    }
}

/// The ring, approved, blocked and message LEDs.
#[derive(Clone)]
pub struct Indicators {
    pub ring: Led,
    pub approved: Led,
    pub blocked: Led,
    pub message: Led
}
impl Indicators {
    pub fn new(config: &GpioConfig) -> Self {
        if !config.enabled {
            info!("GPIO indicators are disabled by config");
            return Self::disabled();
        }

        #[cfg(feature = "gpio")]
        match Self::open(config) {
            Ok(indicators) => return indicators,
            Err(e) => warn!("Failed to open GPIO indicators, continuing without them: {}", e)
        }

        #[cfg(not(feature = "gpio"))]
        warn!("GPIO indicators are enabled but this build has no gpio support");

        Self::disabled()
    }

    #[cfg(feature = "gpio")]
    fn open(config: &GpioConfig) -> Result<Self> {
        let gpio = Gpio::new()?;
        Ok(Self {
            ring: Led::gpio("Ring", &gpio, config.ring_pin)?,
            approved: Led::gpio("Approved", &gpio, config.approved_pin)?,
            blocked: Led::gpio("Blocked", &gpio, config.blocked_pin)?,
            message: Led::gpio("Message", &gpio, config.message_pin)?
        })
    }

    pub fn disabled() -> Self {
        Self {
            ring: Led::disabled("Ring"),
            approved: Led::disabled("Approved"),
            blocked: Led::disabled("Blocked"),
            message: Led::disabled("Message")
        }
    }

    /// Shows whether there are unplayed messages waiting.
    pub async fn show_unplayed(&self, unplayed: i64) {
        if unplayed > 0 {
            self.message.pulse().await;
        } else {
            self.message.turn_off().await;
        }
    }

    pub async fn all_off(&self) {
        for led in [&self.ring, &self.approved, &self.blocked, &self.message] {
            led.turn_off().await;
        }
    }
}
