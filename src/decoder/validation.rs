//! Centralized input validation. Every spawn argument that originates from
//! an HTTP caller passes through one of these validators before a device
//! claim or process spawn is attempted; rejection never reaches a shell —
//! every validated value becomes exactly one argv element.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::CoreError;

static INTERFACE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,14}$").unwrap());

static HCI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^hci([0-9]{1,3})$").unwrap());

static MAC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").unwrap());

static HOSTNAME_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").unwrap());

fn invalid(field: &str, message: impl Into<String>) -> CoreError {
    CoreError::InvalidInput {
        field: field.to_string(),
        message: message.into(),
    }
}

/// integer 0..63
pub fn validate_device_index(field: &str, value: &Value) -> Result<u32, CoreError> {
    let n = value
        .as_u64()
        .ok_or_else(|| invalid(field, "must be a non-negative integer"))?;
    if n > 63 {
        return Err(invalid(field, "must be in 0..63"));
    }
    Ok(n as u32)
}

/// numeric in [0, 60] or the literal "auto"
pub fn validate_gain(field: &str, value: &Value) -> Result<String, CoreError> {
    if let Some(s) = value.as_str() {
        if s == "auto" {
            return Ok("auto".to_string());
        }
        return Err(invalid(field, "string gain must be the literal \"auto\""));
    }
    let n = value
        .as_f64()
        .ok_or_else(|| invalid(field, "must be numeric or \"auto\""))?;
    if !(0.0..=60.0).contains(&n) {
        return Err(invalid(field, "must be in [0, 60]"));
    }
    Ok(format!("{n}"))
}

/// integer in [-200, 200]
pub fn validate_ppm(field: &str, value: &Value) -> Result<i32, CoreError> {
    let n = value
        .as_i64()
        .ok_or_else(|| invalid(field, "must be an integer"))?;
    if !(-200..=200).contains(&n) {
        return Err(invalid(field, "must be in [-200, 200]"));
    }
    Ok(n as i32)
}

/// positive integer within the tool's permitted band
pub fn validate_frequency_hz(
    field: &str,
    value: &Value,
    band: (u64, u64),
) -> Result<u64, CoreError> {
    let n = value
        .as_u64()
        .ok_or_else(|| invalid(field, "must be a positive integer"))?;
    if n == 0 || n < band.0 || n > band.1 {
        return Err(invalid(
            field,
            format!("must be within the permitted band {}..{}", band.0, band.1),
        ));
    }
    Ok(n)
}

/// matches `[A-Za-z][A-Za-z0-9_-]{0,14}`
pub fn validate_interface_name(field: &str, value: &Value) -> Result<String, CoreError> {
    let s = value
        .as_str()
        .ok_or_else(|| invalid(field, "must be a string"))?;
    if !INTERFACE_NAME_RE.is_match(s) {
        return Err(invalid(field, "must match [A-Za-z][A-Za-z0-9_-]{0,14}"));
    }
    Ok(s.to_string())
}

/// matches `hci(0..255)`
pub fn validate_hci_interface(field: &str, value: &Value) -> Result<String, CoreError> {
    let s = value
        .as_str()
        .ok_or_else(|| invalid(field, "must be a string"))?;
    let captures = HCI_RE
        .captures(s)
        .ok_or_else(|| invalid(field, "must match hci(0..255)"))?;
    let index: u32 = captures[1]
        .parse()
        .map_err(|_| invalid(field, "invalid hci index"))?;
    if index > 255 {
        return Err(invalid(field, "hci index must be 0..255"));
    }
    Ok(s.to_string())
}

/// canonical colon-hex MAC address
pub fn validate_mac_address(field: &str, value: &Value) -> Result<String, CoreError> {
    let s = value
        .as_str()
        .ok_or_else(|| invalid(field, "must be a string"))?;
    if !MAC_RE.is_match(s) {
        return Err(invalid(field, "must be a canonical colon-hex MAC address"));
    }
    Ok(s.to_uppercase())
}

/// DNS-safe label; max 253 chars
pub fn validate_hostname(field: &str, value: &Value) -> Result<String, CoreError> {
    let s = value
        .as_str()
        .ok_or_else(|| invalid(field, "must be a string"))?;
    if s.is_empty() || s.len() > 253 {
        return Err(invalid(field, "must be 1..253 characters"));
    }
    for label in s.split('.') {
        if !HOSTNAME_LABEL_RE.is_match(label) {
            return Err(invalid(field, "must be a DNS-safe hostname"));
        }
    }
    Ok(s.to_string())
}

/// File path in user input must resolve under an allow-listed root.
pub fn validate_allowlisted_path(
    field: &str,
    value: &Value,
    allowed_root: &std::path::Path,
) -> Result<std::path::PathBuf, CoreError> {
    let s = value
        .as_str()
        .ok_or_else(|| invalid(field, "must be a string"))?;
    let candidate = allowed_root.join(s);
    let normalized = normalize(&candidate);
    let normalized_root = normalize(allowed_root);
    if !normalized.starts_with(&normalized_root) {
        return Err(invalid(field, "must resolve under the allow-listed root"));
    }
    Ok(normalized)
}

fn normalize(path: &std::path::Path) -> std::path::PathBuf {
    let mut out = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_index_range() {
        assert!(validate_device_index("device", &json!(0)).is_ok());
        assert!(validate_device_index("device", &json!(63)).is_ok());
        assert!(validate_device_index("device", &json!(64)).is_err());
        assert!(validate_device_index("device", &json!(-1)).is_err());
    }

    #[test]
    fn gain_accepts_auto_and_numeric_range() {
        assert_eq!(validate_gain("gain", &json!("auto")).unwrap(), "auto");
        assert!(validate_gain("gain", &json!(40)).is_ok());
        assert!(validate_gain("gain", &json!(61)).is_err());
        assert!(validate_gain("gain", &json!("fast")).is_err());
    }

    #[test]
    fn ppm_range() {
        assert!(validate_ppm("ppm", &json!(-200)).is_ok());
        assert!(validate_ppm("ppm", &json!(200)).is_ok());
        assert!(validate_ppm("ppm", &json!(201)).is_err());
    }

    #[test]
    fn interface_name_shell_metacharacters_rejected() {
        for hostile in ["wlan0; rm -rf /", "wlan0 && echo", "wlan0`id`", "wlan0$(id)"] {
            assert!(validate_interface_name("iface", &json!(hostile)).is_err());
        }
        assert!(validate_interface_name("iface", &json!("wlan0")).is_ok());
    }

    #[test]
    fn hci_interface_pattern() {
        assert!(validate_hci_interface("iface", &json!("hci0")).is_ok());
        assert!(validate_hci_interface("iface", &json!("hci255")).is_ok());
        assert!(validate_hci_interface("iface", &json!("hci256")).is_err());
        assert!(validate_hci_interface("iface", &json!("wlan0")).is_err());
    }

    #[test]
    fn mac_address_canonical_form() {
        assert!(validate_mac_address("mac", &json!("AA:BB:CC:DD:EE:FF")).is_ok());
        assert!(validate_mac_address("mac", &json!("aabbccddeeff")).is_err());
    }

    #[test]
    fn hostname_dns_safe() {
        assert!(validate_hostname("host", &json!("aprs.glidernet.org")).is_ok());
        assert!(validate_hostname("host", &json!("-bad.example.com")).is_err());
        assert!(validate_hostname("host", &json!("a".repeat(254))).is_err());
    }

    #[test]
    fn allowlisted_path_rejects_traversal() {
        let root = std::path::Path::new("/var/valentine/captures");
        assert!(validate_allowlisted_path("path", &json!("capture.csv"), root).is_ok());
        assert!(validate_allowlisted_path("path", &json!("../../etc/passwd"), root).is_err());
    }
}
