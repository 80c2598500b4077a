//! Capabilities the provisioning core consumes from the board.
//!
//! Each back-end (ESP-IDF or the host simulator) implements these once; the
//! state machines never touch a peripheral directly.

use std::net::Ipv4Addr;

use crate::{
    error::{self, HalError, RadioError, StoreError},
    record::ConfigRecord,
};

pub trait Clock {
    /// Monotonic milliseconds. Wraps at `u32::MAX`; compare with [`elapsed_ms`].
    fn now_ms(&self) -> u32;
    fn delay_ms(&mut self, ms: u32);
}

pub trait OutputPin {
    fn set_level(&mut self, high: bool) -> Result<(), HalError>;
}

pub trait InputPin {
    fn is_high(&mut self) -> Result<bool, HalError>;
}

/// Byte-addressable non-volatile region with an explicit commit step.
pub trait NvRegion {
    fn len(&self) -> usize;
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError>;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointSettings {
    pub ssid: String,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

pub trait Radio {
    fn begin_station(&mut self, ssid: &str, passphrase: &str) -> Result<(), RadioError>;
    fn is_connected(&mut self) -> bool;
    fn disconnect(&mut self);
    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), RadioError>;
}

pub trait SystemControl {
    fn restart(&mut self);
}

/// Mode-specific runtime that takes over once the station link is up.
pub trait ModeRuntime {
    fn start(&mut self, record: &ConfigRecord) -> error::Result<()>;
    fn poll(&mut self, now_ms: u32);
}

pub fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Shared check for every "has `duration` passed since `since`" decision.
pub fn has_elapsed(now: u32, since: u32, duration: u32) -> bool {
    elapsed_ms(now, since) >= duration
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_survives_counter_wrap() {
        assert_eq!(elapsed_ms(5, u32::MAX - 4), 10);
        assert_eq!(elapsed_ms(1_000, 400), 600);
        assert!(has_elapsed(3, u32::MAX - 996, 1_000));
        assert!(!has_elapsed(2, u32::MAX - 996, 1_000));
    }
}
