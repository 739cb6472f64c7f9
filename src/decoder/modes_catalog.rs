//! The compiled-in table of per-mode metadata: which tools a mode needs,
//! how to build its argv, how to parse its output, and where results land.

use crate::device::DeviceKind;

use serde_json::{Map, Value};

use super::builders::{
    build_airodump, build_bluetooth_scan, build_direwolf, build_dump1090, build_generic_single,
    build_multimon, build_rtl433, build_uat_pipeline, ArgvBuilder,
};
use super::mode::{ModeId, ParserKind};
use super::params::{ParamField, ValidatorKind};
use super::parsers::normalize_uat_record;

/// Static metadata for one [`ModeId`]: tool names to resolve, the argv
/// builder, the parser to run on its output, the device kind it claims, its
/// declared param schema, and the store it writes into.
pub struct DecoderModeSpec {
    pub mode_id: ModeId,
    pub required_tools: &'static [&'static str],
    pub build_argv: ArgvBuilder,
    pub parser: ParserKind,
    pub device_kind: Option<DeviceKind>,
    pub params: &'static [ParamField],
    pub store_name: &'static str,
    pub default_ttl_seconds: u64,
    /// Field in the normalized record used as the store key.
    pub key_field: &'static str,
    /// Stamped onto every upserted record when a store is shared across
    /// multiple modes (`adsb`'s `"1090"`/`"uat"` source tag).
    pub source_tag: Option<&'static str>,
    /// Translates this mode's raw wire-format object into the canonical
    /// record shape (§4.4) before it is keyed and merged. `None` when the
    /// parser already emits canonical field names.
    pub normalize: Option<fn(Map<String, Value>) -> Map<String, Value>>,
}

const ADSB_PARAMS: &[ParamField] = &[
    ParamField { name: "device", required: true, validator: ValidatorKind::DeviceIndex },
    ParamField { name: "gain", required: false, validator: ValidatorKind::Gain },
    ParamField { name: "ppm", required: false, validator: ValidatorKind::Ppm },
];

const DEVICE_ONLY_PARAMS: &[ParamField] = &[ParamField {
    name: "device",
    required: true,
    validator: ValidatorKind::DeviceIndex,
}];

const WIFI_PARAMS: &[ParamField] = &[ParamField {
    name: "interface",
    required: true,
    validator: ValidatorKind::InterfaceName,
}];

const BLUETOOTH_PARAMS: &[ParamField] = &[ParamField {
    name: "hci",
    required: true,
    validator: ValidatorKind::HciInterface,
}];

/// Modes sharing the `adsb` store default to a 5-minute TTL (spec table:
/// aircraft positions go stale fast).
const ADSB_TTL_SECONDS: u64 = 5 * 60;
const WIFI_TTL_SECONDS: u64 = 10 * 60;
const BLUETOOTH_TTL_SECONDS: u64 = 5 * 60;
const DSC_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_TTL_SECONDS: u64 = 10 * 60;

/// The closed catalog, one entry per [`ModeId`]. `Adsb1090` and `AdsbUat`
/// intentionally share `store_name = "adsb"`.
pub fn catalog() -> &'static [DecoderModeSpec] {
    &[
        DecoderModeSpec {
            mode_id: ModeId::Adsb1090,
            required_tools: &["dump1090"],
            build_argv: build_dump1090,
            parser: ParserKind::CsvOverTcp,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: ADSB_PARAMS,
            store_name: "adsb",
            default_ttl_seconds: ADSB_TTL_SECONDS,
            key_field: "icao",
            source_tag: Some("1090"),
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::AdsbUat,
            required_tools: &["dump978-fa", "uat2json"],
            build_argv: build_uat_pipeline,
            parser: ParserKind::LineJson,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: ADSB_PARAMS,
            store_name: "adsb",
            default_ttl_seconds: ADSB_TTL_SECONDS,
            key_field: "icao",
            source_tag: Some("uat"),
            normalize: Some(normalize_uat_record),
        },
        DecoderModeSpec {
            mode_id: ModeId::Ais,
            required_tools: &["tool"],
            build_argv: build_generic_single,
            parser: ParserKind::LineJson,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "ais",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "mmsi",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::Acars,
            required_tools: &["tool"],
            build_argv: build_generic_single,
            parser: ParserKind::LineJson,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "acars",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "tail",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::Pocsag,
            required_tools: &["multimon-ng", "multimon-ng-mode"],
            build_argv: build_multimon,
            parser: ParserKind::RegexLines,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "pager",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "address",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::Rtl433,
            required_tools: &["rtl_433"],
            build_argv: build_rtl433,
            parser: ParserKind::LineJson,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: ADSB_PARAMS,
            store_name: "sensor",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "id",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::WifiScan,
            required_tools: &["airodump-ng"],
            build_argv: build_airodump,
            parser: ParserKind::CsvFile,
            device_kind: Some(DeviceKind::WifiNic),
            params: WIFI_PARAMS,
            store_name: "wifi",
            default_ttl_seconds: WIFI_TTL_SECONDS,
            key_field: "bssid",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::Bluetooth,
            required_tools: &["bluetoothctl-scan"],
            build_argv: build_bluetooth_scan,
            parser: ParserKind::RegexLines,
            device_kind: Some(DeviceKind::Hci),
            params: BLUETOOTH_PARAMS,
            store_name: "bluetooth",
            default_ttl_seconds: BLUETOOTH_TTL_SECONDS,
            key_field: "mac",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::Aprs,
            required_tools: &["direwolf"],
            build_argv: build_direwolf,
            parser: ParserKind::RegexLines,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "aprs",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "callsign",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::Dsc,
            required_tools: &["tool"],
            build_argv: build_generic_single,
            parser: ParserKind::RegexLines,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "dsc",
            default_ttl_seconds: DSC_TTL_SECONDS,
            key_field: "mmsi",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::Dmr,
            required_tools: &["tool"],
            build_argv: build_generic_single,
            parser: ParserKind::Binary,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "dmr",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "talkgroup",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::Meshtastic,
            required_tools: &["tool"],
            build_argv: build_generic_single,
            parser: ParserKind::LineJson,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "meshtastic",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "node_id",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::Sstv,
            required_tools: &["tool"],
            build_argv: build_generic_single,
            parser: ParserKind::Binary,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "sstv",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "image_id",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::WeatherSat,
            required_tools: &["tool"],
            build_argv: build_generic_single,
            parser: ParserKind::Binary,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "weather-sat",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "pass_id",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::Satellite,
            required_tools: &["tool"],
            build_argv: build_generic_single,
            parser: ParserKind::Binary,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "satellite",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "norad_id",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::Rtlamr,
            required_tools: &["tool"],
            build_argv: build_generic_single,
            parser: ParserKind::LineJson,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "rtlamr",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "meter_id",
            source_tag: None,
            normalize: None,
        },
        DecoderModeSpec {
            mode_id: ModeId::ListeningPost,
            required_tools: &["tool"],
            build_argv: build_generic_single,
            parser: ParserKind::RegexLines,
            device_kind: Some(DeviceKind::Rtlsdr),
            params: DEVICE_ONLY_PARAMS,
            store_name: "listening-post",
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_field: "id",
            source_tag: None,
            normalize: None,
        },
    ]
}

pub fn spec_for(mode_id: ModeId) -> &'static DecoderModeSpec {
    catalog()
        .iter()
        .find(|m| m.mode_id == mode_id)
        .expect("every ModeId has a catalog entry")
}
