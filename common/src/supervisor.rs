//! Main-loop regime once the device is operational.

use log::{info, warn};

use crate::{
    button::RecoveryButton,
    error::Result,
    hal::{InputPin, ModeRuntime, NvRegion, OutputPin, SystemControl},
    indicator::StatusIndicator,
    record::ConfigRecord,
    store::ConfigStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Running,
    Restarting,
}

pub struct Supervisor<I, R, P, M> {
    button: RecoveryButton<I>,
    store: ConfigStore<R>,
    indicator: StatusIndicator<P>,
    runtime: M,
}

impl<I, R, P, M> Supervisor<I, R, P, M>
where
    I: InputPin,
    R: NvRegion,
    P: OutputPin,
    M: ModeRuntime,
{
    /// Hands `record` to the mode runtime and takes over the loop.
    pub fn start(
        record: &ConfigRecord,
        store: ConfigStore<R>,
        indicator: StatusIndicator<P>,
        button: RecoveryButton<I>,
        mut runtime: M,
    ) -> Result<Self> {
        runtime.start(record)?;
        info!("{} runtime started", record.mode().as_str());

        Ok(Self {
            button,
            store,
            indicator,
            runtime,
        })
    }

    /// One main-loop iteration. Never blocks.
    pub fn tick<S: SystemControl>(&mut self, system: &mut S, now_ms: u32) -> LoopStatus {
        if self.button.poll(now_ms).is_some() {
            warn!("recovery hold: clearing stored configuration");
            if let Err(err) = self.store.invalidate() {
                warn!("failed to clear configuration: {err}");
            }
            info!("restarting");
            system.restart();
            return LoopStatus::Restarting;
        }

        self.indicator.tick(now_ms);
        self.runtime.poll(now_ms);
        LoopStatus::Running
    }

    pub fn runtime(&self) -> &M {
        &self.runtime
    }

    pub fn into_store(self) -> ConfigStore<R> {
        self.store
    }
}
