//! `start`/`stop`/`status`: the lifecycle operations every mode's HTTP
//! handlers call through to. Each operates on one mode's [`DecoderInstance`]
//! under its own mutex; no operation holds more than one mode's lock, and
//! none but `start`'s device-claim step touches the arbiter while holding
//! it.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::device::{ClaimResult, DeviceId};
use crate::error::{CoreError, CoreResult};
use crate::process::{drain_lines, Capture};

use super::builders::resolve_tool_paths;
use super::instance::InstanceStatus;
use super::mode::{ModeId, ParserKind};
use super::modes_catalog::spec_for;
use super::params::{validate_params, ParamSet};
use super::parsers::{run_line_json, run_opaque_binary, run_regex_lines, run_sbs_lines, tail_csv_file, ParserContext, ParserOutcome};
use super::registry::{DecoderRegistry, RunningTasks};

/// What `status` reports: a read-only projection of [`super::instance::DecoderInstance`].
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub mode: &'static str,
    pub status: InstanceStatus,
    pub claimed_devices: Vec<String>,
    pub uptime_seconds: Option<i64>,
    pub message_count: u64,
    pub last_error: Option<String>,
}

/// Side-effect-free snapshot of one mode's current state.
pub fn status(registry: &DecoderRegistry, mode_id: ModeId) -> StatusReport {
    let inst = registry.instance(mode_id);
    let guard = inst.lock().expect("instance mutex poisoned");
    let now = chrono::Utc::now();
    StatusReport {
        mode: mode_id.as_str(),
        status: guard.status,
        claimed_devices: guard.claimed_devices.iter().map(DeviceId::to_string).collect(),
        uptime_seconds: guard.uptime_seconds(now),
        message_count: guard.message_count,
        last_error: guard.last_error.clone(),
    }
}

/// Start a mode: reject if not idle, validate params, resolve tools, claim
/// devices, build argv, spawn, run the fast-fail check, start the parser
/// task, and transition to `running`.
pub async fn start(registry: &Arc<DecoderRegistry>, mode_id: ModeId, raw_params: &Map<String, Value>) -> CoreResult<()> {
    {
        let inst = registry.instance(mode_id);
        let guard = inst.lock().expect("instance mutex poisoned");
        if !guard.is_idle() {
            return Err(CoreError::AlreadyRunning {
                mode: mode_id.to_string(),
            });
        }
    }

    let spec = spec_for(mode_id);
    let params = validate_params(spec.params, raw_params)?;

    let overrides = registry
        .config
        .mode_overrides
        .get(mode_id.as_str())
        .map(|o| o.tool_paths.clone())
        .unwrap_or_default();
    let tools = resolve_tool_paths(spec.required_tools, &overrides)?;

    let device_id = match spec.device_kind {
        Some(kind) => {
            let index = params.device_index().ok_or_else(|| CoreError::InvalidInput {
                field: "device".to_string(),
                message: "required field missing".to_string(),
            })?;
            Some(DeviceId { kind, index })
        }
        None => None,
    };

    if let Some(device_id) = &device_id {
        match registry.arbiter.claim(device_id, mode_id.as_str()) {
            ClaimResult::Ok => {}
            ClaimResult::Busy { current_owner } => {
                return Err(CoreError::DeviceBusy {
                    device_id: device_id.to_string(),
                    current_owner,
                });
            }
        }
    }

    {
        let inst = registry.instance(mode_id);
        let mut guard = inst.lock().expect("instance mutex poisoned");
        guard.mark_starting(device_id.clone().into_iter().collect());
    }

    match start_inner(registry, mode_id, spec.build_argv, &tools, &params).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(device_id) = &device_id {
                registry.arbiter.release(device_id, mode_id.as_str());
            }
            let inst = registry.instance(mode_id);
            inst.lock().expect("instance mutex poisoned").reset_to_idle();
            Err(e)
        }
    }
}

async fn start_inner(
    registry: &Arc<DecoderRegistry>,
    mode_id: ModeId,
    build_argv: super::builders::ArgvBuilder,
    tools: &super::builders::ToolPaths,
    params: &ParamSet,
) -> CoreResult<()> {
    let spec = spec_for(mode_id);
    let work_dir = registry.working_dir();
    std::fs::create_dir_all(&work_dir).map_err(|e| CoreError::Internal(format!("work dir: {e}")))?;

    let pipeline = build_argv(tools, params, &work_dir)?;
    let capture = match spec.parser {
        ParserKind::CsvFile => Capture::Stderr,
        _ => Capture::Both,
    };

    let (handle, stdout, mut stderr) = if pipeline.len() == 1 {
        let (h, out, err) = registry.supervisor.spawn(&pipeline[0], capture)?;
        (h, out, err)
    } else {
        let want_stdout = !matches!(spec.parser, ParserKind::CsvFile);
        let (h, out, err) = registry.supervisor.spawn_pipeline(&pipeline, want_stdout)?;
        (h, out, err)
    };

    let fast_fail_window = Duration::from_millis(registry.config.fast_fail_window_ms);
    if let Err(e) = registry
        .supervisor
        .fast_fail_check(handle, fast_fail_window, stderr.as_mut())
        .await
    {
        registry.supervisor.terminate(handle).await;
        return Err(e);
    }

    let now = chrono::Utc::now();
    {
        let inst = registry.instance(mode_id);
        inst.lock().expect("instance mutex poisoned").mark_running(handle, now);
    }

    if let Some(stderr) = stderr {
        spawn_stderr_drain(registry.clone(), mode_id, stderr);
    }

    let cancel = CancellationToken::new();
    let parser = spawn_parser_task(registry.clone(), mode_id, spec.parser, stdout, work_dir, cancel.clone());
    registry.tasks.insert(mode_id, RunningTasks { parser, cancel });

    registry
        .bus_for(mode_id)
        .publish(crate::bus::BusEvent::new("status", serde_json::json!({"status": "started"})));

    metrics::counter!("decoder.started").increment(1);
    info!(mode = %mode_id, "decoder started");
    Ok(())
}

/// Drain a running decoder's stderr for the life of the process instead of
/// leaving the pipe to close on drop. Each line becomes the instance's
/// `last_error`, so a crash report (or an operator polling `status`) always
/// has the most recent line the tool printed, not just whatever fit in the
/// fast-fail window.
fn spawn_stderr_drain(
    registry: Arc<DecoderRegistry>,
    mode_id: ModeId,
    stderr: Box<dyn tokio::io::AsyncRead + Unpin + Send>,
) {
    tokio::spawn(async move {
        drain_lines(stderr, |line| {
            let inst = registry.instance(mode_id);
            inst.lock().expect("instance mutex poisoned").last_error = Some(line.to_string());
        })
        .await;
    });
}

fn spawn_parser_task(
    registry: Arc<DecoderRegistry>,
    mode_id: ModeId,
    parser_kind: ParserKind,
    stdout: Option<Box<dyn tokio::io::AsyncRead + Unpin + Send>>,
    work_dir: std::path::PathBuf,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let spec = spec_for(mode_id);
    let store = registry.store_for(mode_id);
    let bus = registry.bus_for(mode_id);
    let key_field = spec.key_field;
    let source_tag = spec.source_tag;
    let event_type: &'static str = spec.store_name;
    let normalize = spec.normalize;

    tokio::spawn(async move {
        let registry_for_counter = registry.clone();
        let ctx = ParserContext {
            store,
            bus,
            key_field,
            source_tag,
            event_type,
            normalize,
            on_message: Box::new(move || {
                let inst = registry_for_counter.instance(mode_id);
                inst.lock().expect("instance mutex poisoned").record_message();
            }),
        };

        let outcome = match parser_kind {
            ParserKind::LineJson => match stdout {
                Some(r) => run_line_json(r, &ctx).await,
                None => ParserOutcome::Failed("no stdout captured".to_string()),
            },
            ParserKind::CsvOverTcp => match stdout {
                Some(r) => run_sbs_lines(r, &ctx).await,
                None => ParserOutcome::Failed("no stdout captured".to_string()),
            },
            ParserKind::RegexLines => match stdout {
                Some(r) => {
                    let pattern = regex::Regex::new(r"^(?P<tag>[A-Za-z0-9]+):\s*(?P<body>.*)$").unwrap();
                    run_regex_lines(r, &pattern, &ctx).await
                }
                None => ParserOutcome::Failed("no stdout captured".to_string()),
            },
            ParserKind::Binary | ParserKind::Custom => match stdout {
                Some(r) => run_opaque_binary(r, &ctx).await,
                None => ParserOutcome::Failed("no stdout captured".to_string()),
            },
            ParserKind::CsvFile => {
                tail_csv_file(&work_dir, Duration::from_secs(5), &ctx, cancel.clone()).await
            }
        };

        handle_parser_outcome(&registry, mode_id, outcome).await;
    })
}

async fn handle_parser_outcome(registry: &Arc<DecoderRegistry>, mode_id: ModeId, outcome: ParserOutcome) {
    let should_crash = {
        let inst = registry.instance(mode_id);
        let guard = inst.lock().expect("instance mutex poisoned");
        guard.status == InstanceStatus::Running
    };
    if !should_crash {
        return;
    }

    let reason = match outcome {
        ParserOutcome::Ended => "decoder process ended unexpectedly".to_string(),
        ParserOutcome::Failed(e) => format!("parser error: {e}"),
    };
    warn!(mode = %mode_id, reason = %reason, "decoder crashed");

    let devices = {
        let inst = registry.instance(mode_id);
        let mut guard = inst.lock().expect("instance mutex poisoned");
        let devices = guard.claimed_devices.clone();
        guard.mark_crashed(reason.clone());
        devices
    };
    for device_id in &devices {
        registry.arbiter.release(device_id, mode_id.as_str());
    }

    metrics::counter!("decoder.crashed").increment(1);
    registry.bus_for(mode_id).publish(crate::bus::BusEvent::new(
        "status",
        serde_json::json!({"status": "crashed", "error": reason}),
    ));
}

/// Stop a mode: idempotent, always ends idle. Terminates the process group
/// (which ends the parser task via EOF or cancellation), releases device
/// claims, and resets the instance.
pub async fn stop(registry: &Arc<DecoderRegistry>, mode_id: ModeId) -> CoreResult<()> {
    let (handle, devices) = {
        let inst = registry.instance(mode_id);
        let guard = inst.lock().expect("instance mutex poisoned");
        if guard.is_idle() {
            return Ok(());
        }
        (guard.process_handle, guard.claimed_devices.clone())
    };

    if let Some((_, tasks)) = registry.tasks.remove(&mode_id) {
        tasks.cancel.cancel();
        let _ = tasks.parser.await;
    }

    if let Some(handle) = handle {
        registry.supervisor.terminate(handle).await;
    }

    for device_id in &devices {
        registry.arbiter.release(device_id, mode_id.as_str());
    }

    {
        let inst = registry.instance(mode_id);
        inst.lock().expect("instance mutex poisoned").reset_to_idle();
    }

    registry
        .bus_for(mode_id)
        .publish(crate::bus::BusEvent::new("status", serde_json::json!({"status": "stopped"})));

    metrics::counter!("decoder.stopped").increment(1);
    info!(mode = %mode_id, "decoder stopped");
    Ok(())
}

/// Stop every mode that isn't already idle, in `ModeId::all()` order.
/// Returns the modes actually stopped.
pub async fn killall(registry: &Arc<DecoderRegistry>) -> Vec<ModeId> {
    let mut stopped = Vec::new();
    for mode_id in ModeId::all() {
        let was_idle = {
            let inst = registry.instance(*mode_id);
            inst.lock().expect("instance mutex poisoned").is_idle()
        };
        if was_idle {
            continue;
        }
        let _ = stop(registry, *mode_id).await;
        stopped.push(*mode_id);
    }
    let orphans = registry.supervisor.terminate_all().await;
    if orphans > 0 {
        warn!(orphans, "killall found processes outside any mode's tracked handle");
    }
    stopped
}
