use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationMode {
    #[default]
    Http,
    HomeKit,
}

impl OperationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::HomeKit => "HOMEKIT",
        }
    }

    /// Index used both on the setup form and in the stored record.
    pub fn index(self) -> u8 {
        match self {
            Self::Http => 0,
            Self::HomeKit => 1,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Http),
            1 => Some(Self::HomeKit),
            _ => None,
        }
    }
}

/// Coarse device phase reported to logs and to the mode runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    Setup,
    Connecting,
    Operational,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Connecting => "CONNECTING",
            Self::Operational => "OPERATIONAL",
        }
    }
}
