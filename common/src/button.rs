//! Debounced hold detection for the recovery button.

use log::{info, warn};

use crate::hal::{elapsed_ms, has_elapsed, InputPin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldEvent {
    /// The button has been held past the threshold for the first time this press.
    HoldReached,
}

#[derive(Debug, Clone)]
pub struct HoldDetector {
    debounce_ms: u32,
    hold_threshold_ms: u32,
    last_raw_pressed: bool,
    last_change_ms: u32,
    press_start_ms: Option<u32>,
    hold_reported: bool,
}

impl HoldDetector {
    pub fn new(debounce_ms: u32, hold_threshold_ms: u32) -> Self {
        Self {
            debounce_ms,
            hold_threshold_ms,
            last_raw_pressed: false,
            last_change_ms: 0,
            press_start_ms: None,
            hold_reported: false,
        }
    }

    /// Feeds one raw sample. Returns [`HoldEvent::HoldReached`] at most once per
    /// physical press.
    pub fn update(&mut self, raw_pressed: bool, now_ms: u32) -> Option<HoldEvent> {
        if raw_pressed != self.last_raw_pressed {
            self.last_raw_pressed = raw_pressed;
            self.last_change_ms = now_ms;
            return None;
        }

        if elapsed_ms(now_ms, self.last_change_ms) <= self.debounce_ms {
            return None;
        }

        if !raw_pressed {
            self.press_start_ms = None;
            self.hold_reported = false;
            return None;
        }

        let Some(start) = self.press_start_ms else {
            self.press_start_ms = Some(now_ms);
            self.hold_reported = false;
            return None;
        };

        if self.hold_reported || !has_elapsed(now_ms, start, self.hold_threshold_ms) {
            return None;
        }

        self.hold_reported = true;
        Some(HoldEvent::HoldReached)
    }

    pub fn is_pressed(&self) -> bool {
        self.press_start_ms.is_some()
    }
}

/// Active-low push button wired to a pulled-up input.
pub struct RecoveryButton<I> {
    pin: I,
    detector: HoldDetector,
}

impl<I: InputPin> RecoveryButton<I> {
    pub fn new(pin: I, debounce_ms: u32, hold_threshold_ms: u32) -> Self {
        Self {
            pin,
            detector: HoldDetector::new(debounce_ms, hold_threshold_ms),
        }
    }

    pub fn poll(&mut self, now_ms: u32) -> Option<HoldEvent> {
        let pressed = match self.pin.is_high() {
            Ok(high) => !high,
            Err(err) => {
                warn!("recovery button read failed: {err}");
                return None;
            }
        };

        let event = self.detector.update(pressed, now_ms);
        if event.is_some() {
            info!(
                "recovery button held for {} ms",
                self.detector.hold_threshold_ms
            );
        }
        event
    }
}
