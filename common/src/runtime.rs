//! Hand-off target once the station link is up.
//!
//! The operational command surfaces are not part of this firmware; the
//! runtime records the chosen mode, publishes the accessory wiring for the
//! smart-home mode, and otherwise idles.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use log::info;

use crate::{
    accessory::{
        remote_switch, AccessoryDescriptor, AccessoryInfo, CharacteristicKind,
        CharacteristicRegistry, LockState, RegistryBuilder, Value,
    },
    error::Result,
    hal::ModeRuntime,
    record::ConfigRecord,
    types::OperationMode,
};

pub struct HandoffRuntime {
    info: AccessoryInfo,
    power: Arc<AtomicU8>,
    mode: Option<OperationMode>,
    accessory: Option<(AccessoryDescriptor, CharacteristicRegistry)>,
}

impl HandoffRuntime {
    pub fn new(info: AccessoryInfo) -> Self {
        Self {
            info,
            power: Arc::new(AtomicU8::new(LockState::Off.as_u8())),
            mode: None,
            accessory: None,
        }
    }

    pub fn mode(&self) -> Option<OperationMode> {
        self.mode
    }

    pub fn accessory(&self) -> Option<&AccessoryDescriptor> {
        self.accessory.as_ref().map(|(descriptor, _)| descriptor)
    }

    pub fn registry_mut(&mut self) -> Option<&mut CharacteristicRegistry> {
        self.accessory.as_mut().map(|(_, registry)| registry)
    }

    pub fn power_state(&self) -> LockState {
        LockState::from_u8(self.power.load(Ordering::Relaxed)).unwrap_or(LockState::Unknown)
    }

    fn wire_accessory(&self) -> Result<(AccessoryDescriptor, CharacteristicRegistry)> {
        let descriptor = remote_switch(&self.info, self.power_state())?;

        let current = Arc::clone(&self.power);
        let target = Arc::clone(&self.power);
        let requested = Arc::clone(&self.power);
        let registry = RegistryBuilder::new()
            .getter(CharacteristicKind::LockCurrentState, move || {
                Value::U8(current.load(Ordering::Relaxed))
            })
            .getter(CharacteristicKind::LockTargetState, move || {
                Value::U8(target.load(Ordering::Relaxed))
            })
            .setter(CharacteristicKind::LockTargetState, move |value| {
                if let Value::U8(state) = value {
                    info!("power state requested: {state}");
                    requested.store(state, Ordering::Relaxed);
                }
            })
            .setter(CharacteristicKind::Identify, |_| info!("accessory identify"))
            .resolve(&descriptor)?;

        Ok((descriptor, registry))
    }
}

impl ModeRuntime for HandoffRuntime {
    fn start(&mut self, record: &ConfigRecord) -> Result<()> {
        let mode = record.mode();
        self.mode = Some(mode);

        match mode {
            OperationMode::Http => {
                info!("HTTP mode selected; command surface not provided by this build");
            }
            OperationMode::HomeKit => {
                let (descriptor, registry) = self.wire_accessory()?;
                info!(
                    "accessory `{}` ready: {} services, {} bound characteristics",
                    self.info.name,
                    descriptor.services().len(),
                    registry.instance_ids().count()
                );
                self.accessory = Some((descriptor, registry));
            }
        }
        Ok(())
    }

    fn poll(&mut self, _now_ms: u32) {}
}
