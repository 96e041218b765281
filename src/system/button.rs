use anyhow::Result;
use esp_idf_hal::gpio::{AnyIOPin, Input, PinDriver, Pull};
use std::time::{Duration, Instant};

const DEBOUNCE_TIME: Duration = Duration::from_millis(50);
const LONG_PRESS_TIME: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ButtonEvent {
    /// Short press and release: force an update check
    Click,
    /// Held past `LONG_PRESS_TIME`: log updater status
    LongPress,
}

/// The BOOT button (GPIO0), active low.
pub struct BootButton {
    pin: PinDriver<'static, AnyIOPin, Input>,
    pressed: bool,
    press_time: Option<Instant>,
    last_change: Instant,
    long_press_fired: bool,
}

impl BootButton {
    pub fn new(pin: impl Into<AnyIOPin> + 'static) -> Result<Self> {
        let mut pin = PinDriver::input(pin.into())?;
        pin.set_pull(Pull::Up)?;

        Ok(Self {
            pin,
            pressed: false,
            press_time: None,
            last_change: Instant::now(),
            long_press_fired: false,
        })
    }

    pub fn poll(&mut self) -> Option<ButtonEvent> {
        let pressed = self.pin.is_low();
        let now = Instant::now();

        if now.duration_since(self.last_change) < DEBOUNCE_TIME {
            return None;
        }

        if pressed != self.pressed {
            self.last_change = now;
            self.pressed = pressed;

            if pressed {
                self.press_time = Some(now);
                self.long_press_fired = false;
                return None;
            }

            let held = self
                .press_time
                .take()
                .map(|t| now.duration_since(t))
                .unwrap_or(Duration::ZERO);
            if held < LONG_PRESS_TIME && !self.long_press_fired {
                return Some(ButtonEvent::Click);
            }
            return None;
        }

        if pressed && !self.long_press_fired {
            if let Some(press_time) = self.press_time {
                if now.duration_since(press_time) >= LONG_PRESS_TIME {
                    self.long_press_fired = true;
                    return Some(ButtonEvent::LongPress);
                }
            }
        }

        None
    }
}
