use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::{error::Error, hal::AccessPointSettings};

/// Largest reserved-window offset a persisted override may select.
pub const MAX_STORE_OFFSET: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub connect_attempts: u32,
    pub connect_pulse_ms: u32,
    pub debounce_ms: u32,
    pub hold_threshold_ms: u32,
    pub heartbeat_half_period_ms: u32,
    pub portal_blink_ms: u32,
    pub reboot_delay_ms: u32,
    pub ap_address: Ipv4Addr,
    pub ap_netmask: Ipv4Addr,
    pub ap_ssid: String,
    pub dns_ttl_secs: u32,
    pub escape_url: String,
    pub store_offset: usize,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 30,
            connect_pulse_ms: 150,
            debounce_ms: 100,
            hold_threshold_ms: 5_000,
            heartbeat_half_period_ms: 1_000,
            portal_blink_ms: 1_000,
            reboot_delay_ms: 1_000,
            ap_address: Ipv4Addr::new(192, 168, 4, 1),
            ap_netmask: Ipv4Addr::new(255, 255, 255, 0),
            ap_ssid: "PC Switch Setup".to_string(),
            dns_ttl_secs: 3_600,
            escape_url: "http://logout.net".to_string(),
            // The accessory pairing store owns [0, 1408).
            store_offset: 1_408,
        }
    }
}

impl ProvisioningConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let mut config: Self =
            serde_json::from_str(json).map_err(|err| Error::Config(err.to_string()))?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.connect_attempts = self.connect_attempts.clamp(1, 600);
        self.connect_pulse_ms = self.connect_pulse_ms.clamp(10, 5_000);
        self.debounce_ms = self.debounce_ms.clamp(1, 1_000);
        self.hold_threshold_ms = self.hold_threshold_ms.max(self.debounce_ms + 1);
        self.heartbeat_half_period_ms = self.heartbeat_half_period_ms.max(10);
        self.portal_blink_ms = self.portal_blink_ms.max(10);
        self.dns_ttl_secs = self.dns_ttl_secs.max(1);
        self.store_offset = self.store_offset.min(MAX_STORE_OFFSET);

        if self.ap_ssid.trim().is_empty() {
            self.ap_ssid = Self::default().ap_ssid;
        }
    }

    /// Address clients are redirected to while the portal is up.
    pub fn portal_root(&self) -> String {
        format!("http://{}", self.ap_address)
    }

    pub fn access_point(&self) -> AccessPointSettings {
        AccessPointSettings {
            ssid: self.ap_ssid.clone(),
            address: self.ap_address,
            netmask: self.ap_netmask,
        }
    }

    /// Total station-mode budget before falling back to the portal.
    pub fn connect_budget_ms(&self) -> u64 {
        u64::from(self.connect_attempts) * u64::from(self.connect_pulse_ms) * 2
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_give_nine_second_budget() {
        let config = ProvisioningConfig::default();
        assert_eq!(config.connect_budget_ms(), 9_000);
        assert_eq!(config.portal_root(), "http://192.168.4.1");
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = ProvisioningConfig::from_json(r#"{"connect_attempts": 5}"#).unwrap();

        assert_eq!(config.connect_attempts, 5);
        assert_eq!(config.hold_threshold_ms, 5_000);
        assert_eq!(config.ap_ssid, "PC Switch Setup");
    }

    #[test]
    fn sanitize_restores_unusable_values() {
        let mut config = ProvisioningConfig {
            connect_attempts: 0,
            hold_threshold_ms: 50,
            ap_ssid: "  ".to_string(),
            ..ProvisioningConfig::default()
        };
        config.sanitize();

        assert_eq!(config.connect_attempts, 1);
        assert_eq!(config.hold_threshold_ms, 101);
        assert_eq!(config.ap_ssid, "PC Switch Setup");
    }

    #[test]
    fn store_offset_is_capped() {
        let json = format!(r#"{{"store_offset": {}}}"#, usize::MAX);
        let config = ProvisioningConfig::from_json(&json).unwrap();

        assert_eq!(config.store_offset, MAX_STORE_OFFSET);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            ProvisioningConfig::from_json("{not json"),
            Err(Error::Config(_))
        ));
    }
}
