//! Parser tasks: turn a decoder's raw output stream into normalized records
//! merged into its store and published on its bus.
//!
//! Contract (spec "parser task"): read to EOF, split the stream into
//! records per [`super::mode::ParserKind`], normalize each into a partial
//! `serde_json::Map`, merge it into the store, push the merged record to the
//! bus, and count it. A record that fails to parse is skipped and counted,
//! never fatal. EOF or an IO error ends the task and reports
//! [`ParserOutcome::Ended`]/[`ParserOutcome::Failed`] so the caller can drive
//! the instance to `crashed` and release its device claims.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

use crate::bus::{Bus, BusEvent};
use crate::store::Store;

/// Shared wiring every parser needs: where to write, where to publish, and
/// how normalized records are tagged and keyed.
pub struct ParserContext {
    pub store: Arc<Store>,
    pub bus: Arc<Bus>,
    pub key_field: &'static str,
    pub source_tag: Option<&'static str>,
    pub event_type: &'static str,
    /// Translates a mode's raw wire-format object into the store's canonical
    /// field names (e.g. UAT's `address`/`altitude.baro` into `icao`/
    /// `altitude_ft`) before `key_field` is looked up. `None` for modes whose
    /// parser already produces canonical field names (SBS, regex captures,
    /// most line-JSON tools).
    pub normalize: Option<fn(Map<String, Value>) -> Map<String, Value>>,
    pub on_message: Box<dyn Fn() + Send + Sync>,
}

impl ParserContext {
    fn emit(&self, record: Map<String, Value>) {
        let mut record = match self.normalize {
            Some(normalize) => normalize(record),
            None => record,
        };
        let key = record
            .get(self.key_field)
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(key) = key else {
            metrics::counter!("decoder.malformed_record").increment(1);
            return;
        };
        if let Some(tag) = self.source_tag {
            record.insert("source".to_string(), Value::String(tag.to_string()));
        }
        let merged = self.store.upsert(&key, record, Utc::now());
        self.bus.publish(BusEvent::new(
            self.event_type,
            serde_json::to_value(&merged).unwrap_or(Value::Null),
        ));
        (self.on_message)();
    }

    fn malformed(&self) {
        metrics::counter!("decoder.malformed_record").increment(1);
    }
}

#[derive(Debug)]
pub enum ParserOutcome {
    Ended,
    Failed(String),
}

/// `uat2json`'s nested wire shape (`address`, `altitude.baro`,
/// `position.lat`/`lon`, `velocity.groundspeed`/`heading`) translated into
/// the ADS-B store's flat canonical fields (`icao`, `altitude_ft`, `lat`,
/// `lon`, `speed_kt`, `heading_deg`). `callsign` already matches and passes
/// through untouched.
pub fn normalize_uat_record(mut raw: Map<String, Value>) -> Map<String, Value> {
    let mut record = Map::new();
    if let Some(address) = raw.remove("address") {
        record.insert("icao".to_string(), address);
    }
    if let Some(callsign) = raw.remove("callsign") {
        record.insert("callsign".to_string(), callsign);
    }
    if let Some(Value::Object(mut altitude)) = raw.remove("altitude") {
        if let Some(baro) = altitude.remove("baro") {
            record.insert("altitude_ft".to_string(), baro);
        }
    }
    if let Some(Value::Object(mut position)) = raw.remove("position") {
        if let Some(lat) = position.remove("lat") {
            record.insert("lat".to_string(), lat);
        }
        if let Some(lon) = position.remove("lon") {
            record.insert("lon".to_string(), lon);
        }
    }
    if let Some(Value::Object(mut velocity)) = raw.remove("velocity") {
        if let Some(speed) = velocity.remove("groundspeed") {
            record.insert("speed_kt".to_string(), speed);
        }
        if let Some(heading) = velocity.remove("heading") {
            record.insert("heading_deg".to_string(), heading);
        }
    }
    record
}

/// One JSON object per line (`dump978-fa | uat2json`, `rtl_433 -F json`,
/// generic line-JSON tools).
pub async fn run_line_json<R: AsyncRead + Unpin>(reader: R, ctx: &ParserContext) -> ParserOutcome {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(Value::Object(obj)) => ctx.emit(obj),
                    _ => ctx.malformed(),
                }
            }
            Ok(None) => return ParserOutcome::Ended,
            Err(e) => return ParserOutcome::Failed(e.to_string()),
        }
    }
}

/// Tagged text lines matched against a named-capture-group regex (e.g.
/// `multimon-ng`'s `POCSAG512: Address: 1234  Function: 0  ...` lines).
/// Capture group names become record fields verbatim.
pub async fn run_regex_lines<R: AsyncRead + Unpin>(
    reader: R,
    pattern: &Regex,
    ctx: &ParserContext,
) -> ParserOutcome {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match pattern.captures(trimmed) {
                    Some(caps) => {
                        let mut obj = Map::new();
                        for name in pattern.capture_names().flatten() {
                            if let Some(m) = caps.name(name) {
                                obj.insert(name.to_string(), Value::String(m.as_str().to_string()));
                            }
                        }
                        ctx.emit(obj);
                    }
                    None => ctx.malformed(),
                }
            }
            Ok(None) => return ParserOutcome::Ended,
            Err(e) => return ParserOutcome::Failed(e.to_string()),
        }
    }
}

/// BaseStation ("SBS") comma-separated format, as emitted by `dump1090` on
/// its local TCP port. Field order per message type 3 (`MSG,3,...`):
/// icao at index 4, callsign at 10, altitude at 11, lat/lon at 14/15.
pub async fn run_sbs_lines<R: AsyncRead + Unpin>(reader: R, ctx: &ParserContext) -> ParserOutcome {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let fields: Vec<&str> = line.trim().split(',').collect();
                if fields.len() < 16 || fields[0] != "MSG" {
                    ctx.malformed();
                    continue;
                }
                let icao = fields[4].trim();
                if icao.is_empty() {
                    ctx.malformed();
                    continue;
                }
                let mut obj = Map::new();
                obj.insert("icao".to_string(), Value::String(icao.to_string()));
                if !fields[10].trim().is_empty() {
                    obj.insert("callsign".to_string(), Value::String(fields[10].trim().to_string()));
                }
                if let Ok(alt) = fields[11].trim().parse::<f64>() {
                    obj.insert("altitude_ft".to_string(), serde_json::json!(alt));
                }
                if let (Ok(lat), Ok(lon)) = (fields[14].trim().parse::<f64>(), fields[15].trim().parse::<f64>()) {
                    obj.insert("lat".to_string(), serde_json::json!(lat));
                    obj.insert("lon".to_string(), serde_json::json!(lon));
                }
                ctx.emit(obj);
            }
            Ok(None) => return ParserOutcome::Ended,
            Err(e) => return ParserOutcome::Failed(e.to_string()),
        }
    }
}

/// Opaque binary/unspecified-dialect streams (DMR, SSTV, weather satellite,
/// generic satellite): the wire format is out of scope, so the parser only
/// tracks liveness by counting non-empty reads rather than extracting
/// fields. Still satisfies the contract's "count it, never block" shape.
pub async fn run_opaque_binary<R: AsyncRead + Unpin>(mut reader: R, ctx: &ParserContext) -> ParserOutcome {
    let mut buf = [0u8; 8192];
    loop {
        match tokio::io::AsyncReadExt::read(&mut reader, &mut buf).await {
            Ok(0) => return ParserOutcome::Ended,
            Ok(_) => (ctx.on_message)(),
            Err(e) => return ParserOutcome::Failed(e.to_string()),
        }
    }
}

/// Tail the newest `capture-*.csv` file under `work_dir` (airodump-ng's
/// rotating output), reading only newly-appended lines. Polls rather than
/// watching, since airodump rewrites the file's station table in place
/// every beacon interval rather than strictly appending.
pub async fn tail_csv_file(
    work_dir: &std::path::Path,
    poll_interval: std::time::Duration,
    ctx: &ParserContext,
    cancel: tokio_util::sync::CancellationToken,
) -> ParserOutcome {
    let mut interval = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ParserOutcome::Ended,
            _ = interval.tick() => {
                match newest_capture_file(work_dir) {
                    Some(path) => match tokio::fs::read_to_string(&path).await {
                        Ok(contents) => {
                            for line in contents.lines().skip(1) {
                                match parse_airodump_station_line(line) {
                                    Some(obj) => ctx.emit(obj),
                                    None => continue,
                                }
                            }
                        }
                        Err(e) => debug!(error = %e, "airodump capture file unreadable this tick"),
                    },
                    None => continue,
                }
            }
        }
    }
}

fn newest_capture_file(work_dir: &std::path::Path) -> Option<std::path::PathBuf> {
    let entries = std::fs::read_dir(work_dir).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with("capture") && n.ends_with(".csv"))
                .unwrap_or(false)
        })
        .max_by_key(|e| e.metadata().and_then(|m| m.modified()).ok())
        .map(|e| e.path())
}

/// Station line: `BSSID, First seen, Last seen, channel, Speed, Privacy,
/// Cipher, Authentication, Power, # beacons, # IV, LAN IP, ID-length, ESSID, Key`.
fn parse_airodump_station_line(line: &str) -> Option<Map<String, Value>> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 14 {
        return None;
    }
    let bssid = fields[0];
    if bssid.len() != 17 {
        return None;
    }
    let mut obj = Map::new();
    obj.insert("bssid".to_string(), Value::String(bssid.to_string()));
    if let Ok(channel) = fields[3].parse::<i64>() {
        obj.insert("channel".to_string(), serde_json::json!(channel));
    }
    if !fields[13].is_empty() {
        obj.insert("essid".to_string(), Value::String(fields[13].to_string()));
    }
    Some(obj)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(store: Arc<Store>, bus: Arc<Bus>) -> ParserContext {
        ParserContext {
            store,
            bus,
            key_field: "icao",
            source_tag: Some("1090"),
            event_type: "aircraft",
            normalize: None,
            on_message: Box::new(|| {}),
        }
    }

    #[tokio::test]
    async fn line_json_merges_valid_and_skips_malformed() {
        let store = Arc::new(Store::new(300));
        let bus = Arc::new(Bus::new(100, 16, 10));
        let c = ctx(store.clone(), bus);
        let input = b"{\"icao\":\"A0B1C2\",\"altitude_ft\":4500}\nnot json\n\n".to_vec();
        let outcome = run_line_json(std::io::Cursor::new(input), &c).await;
        assert!(matches!(outcome, ParserOutcome::Ended));
        assert_eq!(store.len(), 1);
        let record = store.get("A0B1C2").unwrap();
        assert_eq!(record.fields.get("source"), Some(&Value::String("1090".to_string())));
    }

    #[tokio::test]
    async fn line_json_normalizes_uat_nested_shape_into_canonical_fields() {
        let store = Arc::new(Store::new(300));
        let bus = Arc::new(Bus::new(100, 16, 10));
        let c = ParserContext {
            key_field: "icao",
            source_tag: Some("uat"),
            event_type: "aircraft",
            normalize: Some(normalize_uat_record),
            ..ctx(store.clone(), bus)
        };
        let input = br#"{"address":"A0B1C2","callsign":"N54321","altitude":{"baro":4500},"position":{"lat":40.6892,"lon":-74.0445},"velocity":{"groundspeed":95,"heading":180}}
"#
        .to_vec();
        let outcome = run_line_json(std::io::Cursor::new(input), &c).await;
        assert!(matches!(outcome, ParserOutcome::Ended));
        let record = store.get("A0B1C2").expect("address should normalize to the icao key");
        assert_eq!(record.fields.get("altitude_ft"), Some(&serde_json::json!(4500)));
        assert_eq!(record.fields.get("lat"), Some(&serde_json::json!(40.6892)));
        assert_eq!(record.fields.get("speed_kt"), Some(&serde_json::json!(95)));
        assert_eq!(record.fields.get("source"), Some(&Value::String("uat".to_string())));
    }

    #[tokio::test]
    async fn sbs_lines_extract_icao_and_position() {
        let store = Arc::new(Store::new(300));
        let bus = Arc::new(Bus::new(100, 16, 10));
        let c = ctx(store.clone(), bus);
        let line = "MSG,3,1,1,A0B1C2,1,,,,,,,,,,40.1234,-74.5678,,,,,,\n";
        let outcome = run_sbs_lines(std::io::Cursor::new(line.as_bytes().to_vec()), &c).await;
        assert!(matches!(outcome, ParserOutcome::Ended));
        let record = store.get("A0B1C2").unwrap();
        assert_eq!(record.fields.get("lat"), Some(&serde_json::json!(40.1234)));
    }

    #[tokio::test]
    async fn regex_lines_named_captures_become_fields() {
        let store = Arc::new(Store::new(300));
        let bus = Arc::new(Bus::new(100, 16, 10));
        let c = ParserContext {
            key_field: "address",
            source_tag: None,
            event_type: "pager",
            ..ctx(store.clone(), bus)
        };
        let re = Regex::new(r"^POCSAG512: Address:\s*(?P<address>\d+)").unwrap();
        let line = b"POCSAG512: Address: 1234  Function: 0\n".to_vec();
        let outcome = run_regex_lines(std::io::Cursor::new(line), &re, &c).await;
        assert!(matches!(outcome, ParserOutcome::Ended));
        assert!(store.get("1234").is_some());
    }

    #[test]
    fn airodump_station_line_parses_bssid_and_essid() {
        let line = "AA:BB:CC:DD:EE:FF, 2026-08-01 00:00:00, 2026-08-01 00:01:00,  6, 54, WPA2, CCMP, PSK, -40,  10,  0,   0.0.0.0,  8,  MyNetwork, ";
        let obj = parse_airodump_station_line(line).unwrap();
        assert_eq!(obj.get("bssid"), Some(&Value::String("AA:BB:CC:DD:EE:FF".to_string())));
        assert_eq!(obj.get("essid"), Some(&Value::String("MyNetwork".to_string())));
    }
}
