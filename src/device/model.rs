//! Device identity and metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of physical or logical radio adapter a device represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    Rtlsdr,
    Hackrf,
    Airspy,
    Limesdr,
    Sdrplay,
    Soapy,
    WifiNic,
    Hci,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::Rtlsdr => "rtlsdr",
            DeviceKind::Hackrf => "hackrf",
            DeviceKind::Airspy => "airspy",
            DeviceKind::Limesdr => "limesdr",
            DeviceKind::Sdrplay => "sdrplay",
            DeviceKind::Soapy => "soapy",
            DeviceKind::WifiNic => "wifi-nic",
            DeviceKind::Hci => "hci",
        };
        write!(f, "{s}")
    }
}

/// `(kind, index)` — the identity of a device, stable across enumerations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub kind: DeviceKind,
    pub index: u32,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.index)
    }
}

/// A physical or logical device, as discovered by [`crate::device::arbiter::DeviceArbiter::enumerate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub label: String,
}
