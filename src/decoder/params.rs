//! Mode-declared parameter schemas and the validated result of applying one
//! to a caller's JSON body.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::CoreError;

use super::validation::*;

/// One field a mode's `start` payload accepts, and how to validate it.
#[derive(Debug, Clone)]
pub struct ParamField {
    pub name: &'static str,
    pub required: bool,
    pub validator: ValidatorKind,
}

#[derive(Debug, Clone, Copy)]
pub enum ValidatorKind {
    DeviceIndex,
    Gain,
    Ppm,
    FrequencyHz { band: (u64, u64) },
    InterfaceName,
    HciInterface,
    MacAddress,
    Hostname,
}

/// A validated, typed parameter value.
#[derive(Debug, Clone)]
pub enum ParamValue {
    U32(u32),
    I32(i32),
    U64(u64),
    Str(String),
}

impl ParamValue {
    pub fn as_str(&self) -> String {
        match self {
            ParamValue::U32(n) => n.to_string(),
            ParamValue::I32(n) => n.to_string(),
            ParamValue::U64(n) => n.to_string(),
            ParamValue::Str(s) => s.clone(),
        }
    }
}

/// The validated result of applying a [`ParamField`] schema to a caller's
/// JSON body.
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    values: HashMap<String, ParamValue>,
}

impl ParamSet {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn device_index(&self) -> Option<u32> {
        match self.values.get("device") {
            Some(ParamValue::U32(n)) => Some(*n),
            _ => None,
        }
    }
}

/// Validate `raw` against `schema`, stopping and reporting the first
/// offending field per the spec's "enumerating the first offending field"
/// contract.
pub fn validate_params(
    schema: &[ParamField],
    raw: &serde_json::Map<String, Value>,
) -> Result<ParamSet, CoreError> {
    let mut values = HashMap::new();

    for field in schema {
        let raw_value = raw.get(field.name);
        let value = match raw_value {
            Some(v) => v,
            None if field.required => {
                return Err(CoreError::InvalidInput {
                    field: field.name.to_string(),
                    message: "required field missing".to_string(),
                });
            }
            None => continue,
        };

        let parsed = match field.validator {
            ValidatorKind::DeviceIndex => {
                ParamValue::U32(validate_device_index(field.name, value)?)
            }
            ValidatorKind::Gain => ParamValue::Str(validate_gain(field.name, value)?),
            ValidatorKind::Ppm => ParamValue::I32(validate_ppm(field.name, value)?),
            ValidatorKind::FrequencyHz { band } => {
                ParamValue::U64(validate_frequency_hz(field.name, value, band)?)
            }
            ValidatorKind::InterfaceName => {
                ParamValue::Str(validate_interface_name(field.name, value)?)
            }
            ValidatorKind::HciInterface => {
                ParamValue::Str(validate_hci_interface(field.name, value)?)
            }
            ValidatorKind::MacAddress => {
                ParamValue::Str(validate_mac_address(field.name, value)?)
            }
            ValidatorKind::Hostname => ParamValue::Str(validate_hostname(field.name, value)?),
        };

        values.insert(field.name.to_string(), parsed);
    }

    Ok(ParamSet { values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_first_offending_field() {
        let schema = vec![
            ParamField {
                name: "device",
                required: true,
                validator: ValidatorKind::DeviceIndex,
            },
            ParamField {
                name: "gain",
                required: false,
                validator: ValidatorKind::Gain,
            },
        ];
        let raw = json!({"device": 99, "gain": 40}).as_object().unwrap().clone();
        let err = validate_params(&schema, &raw).unwrap_err();
        match err {
            CoreError::InvalidInput { field, .. } => assert_eq!(field, "device"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn accepts_valid_payload() {
        let schema = vec![ParamField {
            name: "device",
            required: true,
            validator: ValidatorKind::DeviceIndex,
        }];
        let raw = json!({"device": 1}).as_object().unwrap().clone();
        let params = validate_params(&schema, &raw).unwrap();
        assert_eq!(params.device_index(), Some(1));
    }

    #[test]
    fn missing_required_field_rejected() {
        let schema = vec![ParamField {
            name: "device",
            required: true,
            validator: ValidatorKind::DeviceIndex,
        }];
        let raw = serde_json::Map::new();
        assert!(validate_params(&schema, &raw).is_err());
    }
}
