//! Exclusive claims on physical hardware.
//!
//! One mutex, O(1) operations, never held across `.await` — the same
//! single-lock discipline `ConnectionStatusPublisher` uses around its
//! `current_status` field, generalized from a read-mostly status value to a
//! strictly-serialized claim map.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use tracing::debug;

use super::model::{Device, DeviceId, DeviceKind};

/// Outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    Ok,
    Busy { current_owner: String },
}

/// Enforces exclusive access to physical hardware: at most one decoder mode
/// may own a given device at any instant.
pub struct DeviceArbiter {
    claims: Mutex<HashMap<DeviceId, String>>,
}

impl Default for DeviceArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceArbiter {
    pub fn new() -> Self {
        Self {
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// Atomic test-and-set. Never blocks on I/O.
    pub fn claim(&self, device_id: &DeviceId, owner_mode: &str) -> ClaimResult {
        let mut claims = self.claims.lock().expect("arbiter mutex poisoned");
        match claims.get(device_id) {
            Some(owner) => ClaimResult::Busy {
                current_owner: owner.clone(),
            },
            None => {
                claims.insert(device_id.clone(), owner_mode.to_string());
                debug!(device = %device_id, owner = owner_mode, "device claimed");
                ClaimResult::Ok
            }
        }
    }

    /// No-op if unclaimed or claimed by a different owner. Idempotent.
    pub fn release(&self, device_id: &DeviceId, owner_mode: &str) {
        let mut claims = self.claims.lock().expect("arbiter mutex poisoned");
        if claims.get(device_id).map(String::as_str) == Some(owner_mode) {
            claims.remove(device_id);
            debug!(device = %device_id, owner = owner_mode, "device released");
        }
    }

    /// A consistent point-in-time view of every current claim.
    pub fn snapshot(&self) -> HashMap<DeviceId, String> {
        self.claims.lock().expect("arbiter mutex poisoned").clone()
    }

    /// Best-effort hardware discovery. Never fails hard: returns a possibly
    /// empty list plus an advisory error string.
    pub fn enumerate(&self) -> (Vec<Device>, Option<String>) {
        let mut devices = Vec::new();
        let mut advisory = None;

        match std::fs::read_dir("/sys/class/net") {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if looks_like_wifi_nic(&name)
                        && let Some(index) = wifi_index(&name)
                    {
                        devices.push(Device {
                            id: DeviceId {
                                kind: DeviceKind::WifiNic,
                                index,
                            },
                            host: None,
                            port: None,
                            label: name,
                        });
                    }
                }
            }
            Err(e) => advisory = Some(format!("wifi enumeration failed: {e}")),
        }

        for index in 0..8u32 {
            if Path::new(&format!("/sys/class/bluetooth/hci{index}")).exists() {
                devices.push(Device {
                    id: DeviceId {
                        kind: DeviceKind::Hci,
                        index,
                    },
                    host: None,
                    port: None,
                    label: format!("hci{index}"),
                });
            }
        }

        (devices, advisory)
    }
}

fn looks_like_wifi_nic(name: &str) -> bool {
    name.starts_with("wlan") || name.starts_with("wlp")
}

fn wifi_index(name: &str) -> Option<u32> {
    name.trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()
        .or(Some(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(index: u32) -> DeviceId {
        DeviceId {
            kind: DeviceKind::Rtlsdr,
            index,
        }
    }

    #[test]
    fn claim_then_busy() {
        let arbiter = DeviceArbiter::new();
        assert_eq!(arbiter.claim(&dev(0), "adsb"), ClaimResult::Ok);
        assert_eq!(
            arbiter.claim(&dev(0), "uat"),
            ClaimResult::Busy {
                current_owner: "adsb".to_string()
            }
        );
    }

    #[test]
    fn release_is_idempotent_and_owner_scoped() {
        let arbiter = DeviceArbiter::new();
        arbiter.claim(&dev(0), "adsb");
        arbiter.release(&dev(0), "uat"); // wrong owner, no-op
        assert_eq!(
            arbiter.claim(&dev(0), "uat"),
            ClaimResult::Busy {
                current_owner: "adsb".to_string()
            }
        );
        arbiter.release(&dev(0), "adsb");
        arbiter.release(&dev(0), "adsb"); // already released, idempotent
        assert_eq!(arbiter.claim(&dev(0), "uat"), ClaimResult::Ok);
    }

    #[test]
    fn snapshot_reflects_current_claims() {
        let arbiter = DeviceArbiter::new();
        arbiter.claim(&dev(0), "adsb");
        arbiter.claim(&dev(1), "wifi");
        let snap = arbiter.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get(&dev(0)).map(String::as_str), Some("adsb"));
    }

    #[test]
    fn enumerate_never_panics() {
        let arbiter = DeviceArbiter::new();
        let (_devices, _advisory) = arbiter.enumerate();
    }
}
