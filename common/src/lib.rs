pub mod accessory;
pub mod button;
pub mod config;
pub mod dns;
pub mod error;
pub mod hal;
pub mod indicator;
pub mod pages;
pub mod portal;
pub mod provisioning;
pub mod record;
pub mod runtime;
pub mod store;
pub mod supervisor;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use accessory::{AccessoryDescriptor, AccessoryInfo, CharacteristicRegistry, LockState};
pub use button::{HoldDetector, HoldEvent, RecoveryButton};
pub use config::ProvisioningConfig;
pub use dns::CaptiveDns;
pub use error::{Error, Result};
pub use indicator::StatusIndicator;
pub use portal::{Method, PortalRequest, PortalResponse, PortalSession, PortalStatus};
pub use provisioning::{BootOutcome, Provisioner, ProvisioningState};
pub use record::ConfigRecord;
pub use runtime::HandoffRuntime;
pub use store::{ConfigStore, LoadedConfig};
pub use supervisor::{LoopStatus, Supervisor};
pub use types::{DeviceState, OperationMode};
