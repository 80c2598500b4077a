//! In-memory stand-ins for the board capabilities, used by unit tests.

use std::{cell::RefCell, rc::Rc};

use crate::{
    error::{self, HalError, RadioError, StoreError},
    hal::{
        AccessPointSettings, Clock, InputPin, ModeRuntime, NvRegion, OutputPin, Radio,
        SystemControl,
    },
    record::ConfigRecord,
};

pub struct MemoryRegion {
    bytes: Vec<u8>,
    writes: Vec<(usize, usize)>,
    failing_writes: u32,
    commits: u32,
}

impl MemoryRegion {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0xFF; len],
            writes: Vec::new(),
            failing_writes: 0,
            commits: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Successful writes as `(offset, len)`, oldest first.
    pub fn writes(&self) -> &[(usize, usize)] {
        &self.writes
    }

    pub fn commits(&self) -> u32 {
        self.commits
    }

    pub fn fail_next_writes(&mut self, count: u32) {
        self.failing_writes = count;
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), StoreError> {
        if offset.saturating_add(len) > self.bytes.len() {
            return Err(StoreError::OutOfBounds {
                offset,
                len,
                capacity: self.bytes.len(),
            });
        }
        Ok(())
    }
}

impl NvRegion for MemoryRegion {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        self.check(offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        self.check(offset, bytes.len())?;
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.writes.push((offset, bytes.len()));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.commits += 1;
        Ok(())
    }
}

/// Clock whose time only moves when told to, or when something delays on it.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: u32,
}

impl FakeClock {
    pub fn starting_at(now: u32) -> Self {
        Self { now }
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u32 {
        self.now
    }

    fn delay_ms(&mut self, ms: u32) {
        self.now = self.now.wrapping_add(ms);
    }
}

/// Output pin that records every level written; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct FakePin {
    levels: Rc<RefCell<Vec<bool>>>,
}

impl FakePin {
    pub fn levels(&self) -> Vec<bool> {
        self.levels.borrow().clone()
    }

    pub fn level(&self) -> Option<bool> {
        self.levels.borrow().last().copied()
    }
}

impl OutputPin for FakePin {
    fn set_level(&mut self, high: bool) -> Result<(), HalError> {
        self.levels.borrow_mut().push(high);
        Ok(())
    }
}

/// Input pin whose level the test sets; clones share the level.
#[derive(Debug, Clone)]
pub struct FakeInput {
    high: Rc<RefCell<bool>>,
}

impl FakeInput {
    pub fn new(high: bool) -> Self {
        Self {
            high: Rc::new(RefCell::new(high)),
        }
    }

    pub fn set_high(&self, high: bool) {
        *self.high.borrow_mut() = high;
    }
}

impl InputPin for FakeInput {
    fn is_high(&mut self) -> Result<bool, HalError> {
        Ok(*self.high.borrow())
    }
}

/// Radio that reports a link after a fixed number of polls, or never.
#[derive(Debug, Default)]
pub struct ScriptedRadio {
    connect_after_polls: Option<u32>,
    pub polls: u32,
    pub station: Option<(String, String)>,
    pub access_point: Option<AccessPointSettings>,
    pub disconnects: u32,
}

impl ScriptedRadio {
    pub fn never_connects() -> Self {
        Self::default()
    }

    pub fn connects_after(polls: u32) -> Self {
        Self {
            connect_after_polls: Some(polls),
            ..Self::default()
        }
    }
}

impl Radio for ScriptedRadio {
    fn begin_station(&mut self, ssid: &str, passphrase: &str) -> Result<(), RadioError> {
        self.station = Some((ssid.to_string(), passphrase.to_string()));
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.polls += 1;
        self.connect_after_polls
            .is_some_and(|after| self.station.is_some() && self.polls > after)
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.station = None;
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), RadioError> {
        self.access_point = Some(settings.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingSystem {
    pub restarts: u32,
}

impl SystemControl for RecordingSystem {
    fn restart(&mut self) {
        self.restarts += 1;
    }
}

#[derive(Debug, Default)]
pub struct RecordingRuntime {
    pub started: Option<ConfigRecord>,
    pub polls: u32,
}

impl ModeRuntime for RecordingRuntime {
    fn start(&mut self, record: &ConfigRecord) -> error::Result<()> {
        self.started = Some(record.clone());
        Ok(())
    }

    fn poll(&mut self, _now_ms: u32) {
        self.polls += 1;
    }
}
