//! Single status LED: autonomous heartbeat or a forced level, never both.

use log::warn;

use crate::hal::{has_elapsed, OutputPin};

pub struct StatusIndicator<P> {
    pin: P,
    half_period_ms: u32,
    overridden: bool,
    lit: bool,
    // `None` until the first autonomous tick after a period change.
    last_toggle_ms: Option<u32>,
}

impl<P: OutputPin> StatusIndicator<P> {
    /// Starts dark, blinking at `half_period_ms`.
    pub fn new(mut pin: P, half_period_ms: u32) -> Self {
        if let Err(err) = pin.set_level(false) {
            warn!("status LED init failed: {err}");
        }
        Self {
            pin,
            half_period_ms,
            overridden: false,
            lit: false,
            last_toggle_ms: None,
        }
    }

    /// Forces the LED to `on` and suspends the heartbeat until
    /// [`set_blink_period`](Self::set_blink_period) is called.
    pub fn set_override(&mut self, on: bool) {
        self.overridden = true;
        self.drive(on);
    }

    /// Clears any override; blinking restarts its phase on the next tick.
    pub fn set_blink_period(&mut self, half_period_ms: u32) {
        self.overridden = false;
        self.half_period_ms = half_period_ms;
        self.last_toggle_ms = None;
    }

    pub fn tick(&mut self, now_ms: u32) {
        if self.overridden {
            return;
        }

        match self.last_toggle_ms {
            None => self.last_toggle_ms = Some(now_ms),
            Some(last) if has_elapsed(now_ms, last, self.half_period_ms) => {
                self.drive(!self.lit);
                self.last_toggle_ms = Some(now_ms);
            }
            Some(_) => {}
        }
    }

    fn drive(&mut self, on: bool) {
        match self.pin.set_level(on) {
            Ok(()) => self.lit = on,
            Err(err) => warn!("status LED write failed: {err}"),
        }
    }
}
