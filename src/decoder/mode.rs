//! The closed catalog of decoder modes.
//!
//! The distillation names "roughly twenty decoder modes" but only specifies
//! a handful of wire dialects; this enum is the concrete, compiled-in
//! catalog a dispatcher can actually match on, in the spirit of `hut8-soar`'s
//! `StreamFormat` enum (`Aprs`/`Adsb`/`Sbs`).

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeId {
    Adsb1090,
    AdsbUat,
    Ais,
    Acars,
    Pocsag,
    Rtl433,
    WifiScan,
    Bluetooth,
    Aprs,
    Dsc,
    Dmr,
    Meshtastic,
    Sstv,
    WeatherSat,
    Satellite,
    Rtlamr,
    ListeningPost,
}

impl ModeId {
    pub fn as_str(self) -> &'static str {
        match self {
            ModeId::Adsb1090 => "adsb",
            ModeId::AdsbUat => "uat",
            ModeId::Ais => "ais",
            ModeId::Acars => "acars",
            ModeId::Pocsag => "pager",
            ModeId::Rtl433 => "sensor",
            ModeId::WifiScan => "wifi",
            ModeId::Bluetooth => "bluetooth",
            ModeId::Aprs => "aprs",
            ModeId::Dsc => "dsc",
            ModeId::Dmr => "dmr",
            ModeId::Meshtastic => "meshtastic",
            ModeId::Sstv => "sstv",
            ModeId::WeatherSat => "weather-sat",
            ModeId::Satellite => "satellite",
            ModeId::Rtlamr => "rtlamr",
            ModeId::ListeningPost => "listening-post",
        }
    }

    pub fn all() -> &'static [ModeId] {
        &[
            ModeId::Adsb1090,
            ModeId::AdsbUat,
            ModeId::Ais,
            ModeId::Acars,
            ModeId::Pocsag,
            ModeId::Rtl433,
            ModeId::WifiScan,
            ModeId::Bluetooth,
            ModeId::Aprs,
            ModeId::Dsc,
            ModeId::Dmr,
            ModeId::Meshtastic,
            ModeId::Sstv,
            ModeId::WeatherSat,
            ModeId::Satellite,
            ModeId::Rtlamr,
            ModeId::ListeningPost,
        ]
    }

    pub fn from_path_segment(s: &str) -> Option<ModeId> {
        ModeId::all().iter().copied().find(|m| m.as_str() == s)
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a captured output stream is split into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    LineJson,
    CsvOverTcp,
    CsvFile,
    RegexLines,
    Binary,
    Custom,
}
