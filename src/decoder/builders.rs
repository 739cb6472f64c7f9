//! Argv-building functions. Every value that reaches a builder has already
//! passed through [`super::validation`]; builders only arrange already-safe
//! strings into argv lists. No shell is ever invoked — each returned stage
//! is `Vec<String>` handed straight to [`crate::process::ProcessSupervisor`].

use std::collections::HashMap;
use std::path::Path;

use crate::error::{CoreError, CoreResult};

use super::params::ParamSet;

/// Resolved absolute (or `PATH`-searched) paths for the binaries a mode
/// needs, keyed by the logical tool name used in its [`super::modes_catalog`]
/// entry.
#[derive(Debug, Clone, Default)]
pub struct ToolPaths(pub HashMap<String, String>);

impl ToolPaths {
    pub fn resolve(&self, tool: &str) -> CoreResult<String> {
        self.0
            .get(tool)
            .cloned()
            .ok_or_else(|| CoreError::ToolMissing {
                tool: tool.to_string(),
            })
    }
}

/// Resolve every tool a mode needs to a concrete, verified-present path.
/// `overrides` are positional against `required_tools` (the config layer's
/// flat `tool_paths: Vec<String>`); anything left unspecified falls back to
/// a `$PATH` search for the bare tool name.
pub fn resolve_tool_paths(required_tools: &[&str], overrides: &[String]) -> CoreResult<ToolPaths> {
    let mut resolved = HashMap::new();
    for (i, name) in required_tools.iter().enumerate() {
        let candidate = overrides.get(i).cloned();
        let path = locate_tool(name, candidate.as_deref())?;
        resolved.insert((*name).to_string(), path);
    }
    Ok(ToolPaths(resolved))
}

fn locate_tool(name: &str, override_path: Option<&str>) -> CoreResult<String> {
    if let Some(path) = override_path {
        return if is_executable(Path::new(path)) {
            Ok(path.to_string())
        } else {
            Err(CoreError::ToolMissing {
                tool: name.to_string(),
            })
        };
    }

    if name.contains('/') {
        return if is_executable(Path::new(name)) {
            Ok(name.to_string())
        } else {
            Err(CoreError::ToolMissing {
                tool: name.to_string(),
            })
        };
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Ok(candidate.to_string_lossy().into_owned());
        }
    }
    Err(CoreError::ToolMissing {
        tool: name.to_string(),
    })
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

pub type ArgvBuilder = fn(&ToolPaths, &ParamSet, &Path) -> CoreResult<Vec<Vec<String>>>;

/// `dump1090 --net-sbs-port <p> --device-index <d> --gain <g> --ppm <n>`,
/// a single long-running process emitting SBS on a local TCP port.
pub fn build_dump1090(tools: &ToolPaths, params: &ParamSet, _work_dir: &Path) -> CoreResult<Vec<Vec<String>>> {
    let bin = tools.resolve("dump1090")?;
    let mut argv = vec![bin, "--net-sbs-port".to_string(), "30003".to_string()];
    if let Some(device) = params.get("device") {
        argv.push("--device-index".to_string());
        argv.push(device.as_str());
    }
    if let Some(gain) = params.get("gain") {
        argv.push("--gain".to_string());
        argv.push(gain.as_str());
    }
    if let Some(ppm) = params.get("ppm") {
        argv.push("--ppm".to_string());
        argv.push(ppm.as_str());
    }
    Ok(vec![argv])
}

/// `dump978-fa --device <d> ... | uat2json`, a two-stage pipeline where the
/// first stage decodes UAT RF and the second converts its wire format to
/// JSON lines on stdout.
pub fn build_uat_pipeline(tools: &ToolPaths, params: &ParamSet, _work_dir: &Path) -> CoreResult<Vec<Vec<String>>> {
    let dump978 = tools.resolve("dump978-fa")?;
    let uat2json = tools.resolve("uat2json")?;

    let mut decode = vec![dump978, "--format".to_string(), "raw".to_string()];
    if let Some(device) = params.get("device") {
        decode.push("--device".to_string());
        decode.push(device.as_str());
    }
    if let Some(gain) = params.get("gain") {
        decode.push("--gain".to_string());
        decode.push(gain.as_str());
    }

    Ok(vec![decode, vec![uat2json]])
}

/// `rtl_433 -d <d> -F json`, a single process emitting one JSON object per
/// decoded sensor transmission on stdout.
pub fn build_rtl433(tools: &ToolPaths, params: &ParamSet, _work_dir: &Path) -> CoreResult<Vec<Vec<String>>> {
    let bin = tools.resolve("rtl_433")?;
    let mut argv = vec![bin, "-F".to_string(), "json".to_string()];
    if let Some(device) = params.get("device") {
        argv.push("-d".to_string());
        argv.push(device.as_str());
    }
    if let Some(ppm) = params.get("ppm") {
        argv.push("-p".to_string());
        argv.push(ppm.as_str());
    }
    Ok(vec![argv])
}

/// `multimon-ng -a <decoders...> -t raw -`, a single process emitting
/// tagged text lines (e.g. `POCSAG512: Address: ...`) on stdout.
pub fn build_multimon(tools: &ToolPaths, params: &ParamSet, _work_dir: &Path) -> CoreResult<Vec<Vec<String>>> {
    let bin = tools.resolve("multimon-ng")?;
    let decoder = tools.resolve("multimon-ng-mode")?;
    let mut argv = vec![bin, "-a".to_string(), decoder, "-t".to_string(), "raw".to_string(), "-".to_string()];
    if let Some(device) = params.get("device") {
        argv.push("-D".to_string());
        argv.push(device.as_str());
    }
    Ok(vec![argv])
}

/// `airodump-ng --write <work_dir>/capture --output-format csv <iface>`,
/// a single process that writes rotating CSV files into the working
/// directory rather than streaming to stdout; the parser tails the most
/// recent file.
pub fn build_airodump(tools: &ToolPaths, params: &ParamSet, work_dir: &Path) -> CoreResult<Vec<Vec<String>>> {
    let bin = tools.resolve("airodump-ng")?;
    let prefix = work_dir.join("capture");
    let iface = params
        .get("interface")
        .map(|v| v.as_str())
        .ok_or_else(|| CoreError::InvalidInput {
            field: "interface".to_string(),
            message: "required field missing".to_string(),
        })?;
    Ok(vec![vec![
        bin,
        "--write".to_string(),
        prefix.to_string_lossy().into_owned(),
        "--output-format".to_string(),
        "csv".to_string(),
        iface,
    ]])
}

/// `hcitool`/`bluetoothctl`-style scan: invoked by hci interface name only,
/// a single process emitting text lines on stdout.
pub fn build_bluetooth_scan(tools: &ToolPaths, params: &ParamSet, _work_dir: &Path) -> CoreResult<Vec<Vec<String>>> {
    let bin = tools.resolve("bluetoothctl-scan")?;
    let mut argv = vec![bin];
    if let Some(hci) = params.get("hci") {
        argv.push("-i".to_string());
        argv.push(hci.as_str());
    }
    Ok(vec![argv])
}

/// `direwolf -r <device> -t 0 -`, a single process that demodulates
/// AX.25/APRS off an SDR-tapped audio feed and prints TNC2-style text
/// frames (`CALLSIGN>APRS,...:payload`) on stdout.
pub fn build_direwolf(tools: &ToolPaths, params: &ParamSet, _work_dir: &Path) -> CoreResult<Vec<Vec<String>>> {
    let bin = tools.resolve("direwolf")?;
    let mut argv = vec![bin, "-t".to_string(), "0".to_string(), "-".to_string()];
    if let Some(device) = params.get("device") {
        argv.push("-r".to_string());
        argv.push(device.as_str());
    }
    Ok(vec![argv])
}

/// Generic single-process builder for modes whose wire dialect is opaque to
/// this layer (AIS, ACARS, DSC, DMR, Meshtastic, SSTV, weather satellite,
/// generic satellite, RTL-AMR, listening post): `<tool> -d <device>`.
pub fn build_generic_single(tools: &ToolPaths, params: &ParamSet, _work_dir: &Path) -> CoreResult<Vec<Vec<String>>> {
    let bin = tools.resolve("tool")?;
    let mut argv = vec![bin];
    if let Some(device) = params.get("device") {
        argv.push("-d".to_string());
        argv.push(device.as_str());
    }
    Ok(vec![argv])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::mode::ModeId;
    use crate::decoder::params::{validate_params, ParamField, ValidatorKind};
    use serde_json::json;

    fn tools(pairs: &[(&str, &str)]) -> ToolPaths {
        ToolPaths(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn dump1090_argv_carries_device_and_gain() {
        let schema = vec![
            ParamField { name: "device", required: true, validator: ValidatorKind::DeviceIndex },
            ParamField { name: "gain", required: false, validator: ValidatorKind::Gain },
        ];
        let raw = json!({"device": 0, "gain": "auto"}).as_object().unwrap().clone();
        let params = validate_params(&schema, &raw).unwrap();
        let tools = tools(&[("dump1090", "/usr/bin/dump1090")]);
        let pipeline = build_dump1090(&tools, &params, Path::new("/tmp")).unwrap();
        assert_eq!(pipeline.len(), 1);
        assert!(pipeline[0].contains(&"--device-index".to_string()));
        assert!(pipeline[0].contains(&"auto".to_string()));
        let _ = ModeId::Adsb1090;
    }

    #[test]
    fn uat_pipeline_has_two_stages() {
        let tools = tools(&[
            ("dump978-fa", "/usr/bin/dump978-fa"),
            ("uat2json", "/usr/bin/uat2json"),
        ]);
        let params = ParamSet::default();
        let pipeline = build_uat_pipeline(&tools, &params, Path::new("/tmp")).unwrap();
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline[1], vec!["/usr/bin/uat2json".to_string()]);
    }

    #[test]
    fn missing_tool_surfaces_tool_missing() {
        let tools = ToolPaths::default();
        let params = ParamSet::default();
        match build_rtl433(&tools, &params, Path::new("/tmp")) {
            Err(CoreError::ToolMissing { tool }) => assert_eq!(tool, "rtl_433"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn locate_tool_finds_real_binary_on_path() {
        let resolved = resolve_tool_paths(&["sh"], &[]).unwrap();
        assert!(resolved.resolve("sh").unwrap().ends_with("/sh"));
    }

    #[test]
    fn locate_tool_reports_missing() {
        let err = resolve_tool_paths(&["definitely-not-a-real-tool-xyz"], &[]).unwrap_err();
        assert!(matches!(err, CoreError::ToolMissing { .. }));
    }

    #[test]
    fn airodump_writes_into_work_dir() {
        let tools = tools(&[("airodump-ng", "/usr/sbin/airodump-ng")]);
        let schema = vec![ParamField {
            name: "interface",
            required: true,
            validator: ValidatorKind::InterfaceName,
        }];
        let raw = json!({"interface": "wlan0mon"}).as_object().unwrap().clone();
        let params = validate_params(&schema, &raw).unwrap();
        let pipeline = build_airodump(&tools, &params, Path::new("/var/valentine/work")).unwrap();
        assert!(pipeline[0].iter().any(|a| a.contains("/var/valentine/work/capture")));
    }
}
