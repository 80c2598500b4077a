//! Boot-time provisioning: stored credentials, a bounded station join, or the
//! setup portal.
//!
//! [`Provisioner::step`] performs one transition (one connect attempt while
//! `Connecting`) so a harness can drive it tick by tick; [`Provisioner::run`]
//! drives it to a terminal state and hands the store on to whoever runs next.

use log::{debug, info, warn};

use crate::{
    config::ProvisioningConfig,
    error::Result,
    hal::{Clock, NvRegion, OutputPin, Radio},
    indicator::StatusIndicator,
    portal::PortalSession,
    record::ConfigRecord,
    store::ConfigStore,
    types::DeviceState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Loading,
    /// `attempt` counts the polls that have already failed.
    Connecting { attempt: u32 },
    Operational,
    Portal,
}

impl ProvisioningState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Operational | Self::Portal)
    }

    pub fn device_state(self) -> DeviceState {
        match self {
            Self::Loading | Self::Connecting { .. } => DeviceState::Connecting,
            Self::Operational => DeviceState::Operational,
            Self::Portal => DeviceState::Setup,
        }
    }
}

/// Where boot ended up. Either way the store travels with it.
pub enum BootOutcome<R> {
    Operational {
        record: ConfigRecord,
        store: ConfigStore<R>,
    },
    Portal(PortalSession<R>),
}

pub struct Provisioner<R> {
    config: ProvisioningConfig,
    store: ConfigStore<R>,
    state: ProvisioningState,
    record: ConfigRecord,
}

impl<R: NvRegion> Provisioner<R> {
    pub fn new(store: ConfigStore<R>, config: ProvisioningConfig) -> Self {
        Self {
            config,
            store,
            state: ProvisioningState::Loading,
            record: ConfigRecord::default(),
        }
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    pub fn device_state(&self) -> DeviceState {
        self.state.device_state()
    }

    /// Advances by one transition. Terminal states are returned unchanged.
    pub fn step<W, P, C>(
        &mut self,
        radio: &mut W,
        indicator: &mut StatusIndicator<P>,
        clock: &mut C,
    ) -> Result<ProvisioningState>
    where
        W: Radio,
        P: OutputPin,
        C: Clock,
    {
        match self.state {
            ProvisioningState::Loading => {
                indicator.set_blink_period(self.config.heartbeat_half_period_ms);
                let loaded = self.store.load();
                self.record = loaded.record;

                if !loaded.found {
                    info!("no stored configuration");
                    self.enter_portal(radio, indicator)?;
                } else {
                    info!(
                        "joining `{}` (passphrase {} bytes, mode {})",
                        self.record.ssid(),
                        self.record.passphrase().len(),
                        self.record.mode().as_str()
                    );
                    // A refused join surfaces as a timeout below.
                    let joined = radio.begin_station(self.record.ssid(), self.record.passphrase());
                    if let Err(err) = joined {
                        warn!("station start failed: {err}");
                    }
                    self.transition(ProvisioningState::Connecting { attempt: 0 });
                }
            }
            ProvisioningState::Connecting { attempt } => {
                if radio.is_connected() {
                    info!("connected after {attempt} attempts");
                    indicator.set_override(true);
                    self.transition(ProvisioningState::Operational);
                } else if attempt >= self.config.connect_attempts {
                    warn!("no connection after {attempt} attempts");
                    self.enter_portal(radio, indicator)?;
                } else {
                    debug!("connect attempt {}", attempt + 1);
                    let pulse = self.config.connect_pulse_ms;
                    clock.delay_ms(pulse);
                    indicator.set_override(true);
                    clock.delay_ms(pulse);
                    indicator.set_override(false);
                    self.state = ProvisioningState::Connecting {
                        attempt: attempt + 1,
                    };
                }
            }
            ProvisioningState::Operational | ProvisioningState::Portal => {}
        }

        Ok(self.state)
    }

    pub fn run<W, P, C>(
        mut self,
        radio: &mut W,
        indicator: &mut StatusIndicator<P>,
        clock: &mut C,
    ) -> Result<BootOutcome<R>>
    where
        W: Radio,
        P: OutputPin,
        C: Clock,
    {
        while !self.step(radio, indicator, clock)?.is_terminal() {}
        Ok(self.finish(clock.now_ms()))
    }

    /// Hands over the store. Before a terminal state this is treated as a
    /// portal boot.
    pub fn finish(self, now_ms: u32) -> BootOutcome<R> {
        match self.state {
            ProvisioningState::Operational => BootOutcome::Operational {
                record: self.record,
                store: self.store,
            },
            _ => BootOutcome::Portal(PortalSession::new(self.store, &self.config, now_ms)),
        }
    }

    fn enter_portal<W: Radio, P: OutputPin>(
        &mut self,
        radio: &mut W,
        indicator: &mut StatusIndicator<P>,
    ) -> Result<()> {
        radio.disconnect();
        let settings = self.config.access_point();
        radio.start_access_point(&settings)?;
        info!("access point `{}` up at {}", settings.ssid, settings.address);
        indicator.set_override(false);
        self.transition(ProvisioningState::Portal);
        Ok(())
    }

    fn transition(&mut self, next: ProvisioningState) {
        info!(
            "provisioning {:?} -> {:?} (device {})",
            self.state,
            next,
            next.device_state().as_str()
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        store::STORED_RECORD_LEN,
        testing::{FakeClock, FakePin, MemoryRegion, ScriptedRadio},
        types::OperationMode,
    };

    const OFFSET: usize = 1_408;

    fn store(saved: Option<ConfigRecord>) -> ConfigStore<MemoryRegion> {
        let mut store =
            ConfigStore::new(MemoryRegion::new(OFFSET + STORED_RECORD_LEN), OFFSET).unwrap();
        if let Some(record) = saved {
            store.save(&record).unwrap();
        }
        store
    }

    fn home() -> ConfigRecord {
        ConfigRecord::new("Home", "secret123", OperationMode::Http)
    }

    #[test]
    fn never_connecting_polls_31_times_then_falls_back() {
        let config = ProvisioningConfig::default();
        let mut radio = ScriptedRadio::never_connects();
        let pin = FakePin::default();
        let mut led = StatusIndicator::new(pin.clone(), 1_000);
        let mut clock = FakeClock::default();

        let outcome = Provisioner::new(store(Some(home())), config.clone())
            .run(&mut radio, &mut led, &mut clock)
            .unwrap();

        assert!(matches!(outcome, BootOutcome::Portal(_)));
        // One poll per pulse plus a final check once the budget is spent.
        assert_eq!(radio.polls, 31);
        assert_eq!(clock.now_ms(), 9_000);
        assert_eq!(pin.levels().iter().filter(|&&lit| lit).count(), 30);
        assert_eq!(pin.level(), Some(false));
        assert_eq!(radio.disconnects, 1);
        assert_eq!(radio.access_point, Some(config.access_point()));
    }

    #[test]
    fn connecting_early_goes_operational_with_solid_led() {
        let mut radio = ScriptedRadio::connects_after(3);
        let pin = FakePin::default();
        let mut led = StatusIndicator::new(pin.clone(), 1_000);
        let mut clock = FakeClock::default();

        let outcome = Provisioner::new(store(Some(home())), ProvisioningConfig::default())
            .run(&mut radio, &mut led, &mut clock)
            .unwrap();

        let BootOutcome::Operational { record, .. } = outcome else {
            panic!("expected operational boot");
        };
        assert_eq!(record, home());
        assert_eq!(
            radio.station,
            Some(("Home".to_string(), "secret123".to_string()))
        );
        assert_eq!(radio.polls, 4);
        assert_eq!(clock.now_ms(), 900);
        assert_eq!(pin.level(), Some(true));
        assert_eq!(radio.access_point, None);
    }

    #[test]
    fn missing_config_skips_station() {
        let mut radio = ScriptedRadio::connects_after(0);
        let mut led = StatusIndicator::new(FakePin::default(), 1_000);
        let mut clock = FakeClock::default();

        let outcome = Provisioner::new(store(None), ProvisioningConfig::default())
            .run(&mut radio, &mut led, &mut clock)
            .unwrap();

        assert!(matches!(outcome, BootOutcome::Portal(_)));
        assert_eq!(radio.polls, 0);
        assert_eq!(radio.station, None);
        assert_eq!(clock.now_ms(), 0);
        assert!(radio.access_point.is_some());
    }

    #[test]
    fn stepping_reports_device_state() {
        let config = ProvisioningConfig {
            connect_attempts: 2,
            ..ProvisioningConfig::default()
        };
        let mut radio = ScriptedRadio::never_connects();
        let mut led = StatusIndicator::new(FakePin::default(), 1_000);
        let mut clock = FakeClock::default();
        let mut provisioner = Provisioner::new(store(Some(home())), config);

        assert_eq!(provisioner.device_state(), DeviceState::Connecting);

        let states: Vec<_> = (0..5)
            .map(|_| provisioner.step(&mut radio, &mut led, &mut clock).unwrap())
            .collect();

        assert_eq!(
            states,
            vec![
                ProvisioningState::Connecting { attempt: 0 },
                ProvisioningState::Connecting { attempt: 1 },
                ProvisioningState::Connecting { attempt: 2 },
                ProvisioningState::Portal,
                ProvisioningState::Portal,
            ]
        );
        assert_eq!(provisioner.device_state(), DeviceState::Setup);
        assert_eq!(radio.polls, 3);
    }

    #[test]
    fn portal_outcome_keeps_store() {
        let mut radio = ScriptedRadio::never_connects();
        let mut led = StatusIndicator::new(FakePin::default(), 1_000);
        let mut clock = FakeClock::starting_at(42);

        let outcome = Provisioner::new(store(None), ProvisioningConfig::default())
            .run(&mut radio, &mut led, &mut clock)
            .unwrap();

        let BootOutcome::Portal(session) = outcome else {
            panic!("expected portal boot");
        };
        let region = session.into_store().into_region();
        assert_eq!(region.len(), OFFSET + STORED_RECORD_LEN);
        assert!(region.writes().is_empty());
    }
}
