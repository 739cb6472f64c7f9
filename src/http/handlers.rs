use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::decoder::{self, InstanceStatus, ModeId};
use crate::error::{CoreError, CoreResult};
use crate::process::PollResult;

use super::state::AppState;

fn resolve_mode(segment: &str) -> CoreResult<ModeId> {
    ModeId::from_path_segment(segment).ok_or_else(|| CoreError::InvalidInput {
        field: "mode".to_string(),
        message: format!("unknown mode {segment:?}"),
    })
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(mode): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let mode_id = resolve_mode(&mode)?;
    Ok(Json(decoder::status(&state.registry, mode_id)))
}

pub async fn post_start(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, CoreError> {
    let mode_id = resolve_mode(&mode)?;
    let params = body.as_object().cloned().unwrap_or_default();
    decoder::start(&state.registry, mode_id, &params).await?;
    Ok(Json(json!({"status": "started", "mode": mode_id.as_str()})))
}

pub async fn post_stop(
    State(state): State<AppState>,
    Path(mode): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let mode_id = resolve_mode(&mode)?;
    decoder::stop(&state.registry, mode_id).await?;
    Ok(Json(json!({"status": "stopped", "mode": mode_id.as_str()})))
}

pub async fn get_tools(
    State(state): State<AppState>,
    Path(mode): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let mode_id = resolve_mode(&mode)?;
    let spec = decoder::spec_for(mode_id);
    let overrides = state
        .registry
        .config
        .mode_overrides
        .get(mode_id.as_str())
        .map(|o| o.tool_paths.clone())
        .unwrap_or_default();
    let resolved = crate::decoder::builders::resolve_tool_paths(spec.required_tools, &overrides);
    let report = match resolved {
        Ok(paths) => json!({
            "mode": mode_id.as_str(),
            "tools": spec.required_tools.iter().map(|t| json!({
                "name": t,
                "path": paths.resolve(t).ok(),
            })).collect::<Vec<_>>(),
            "allPresent": true,
        }),
        Err(_) => json!({
            "mode": mode_id.as_str(),
            "tools": spec.required_tools,
            "allPresent": false,
        }),
    };
    Ok(Json(report))
}

/// Checks that every `running` decoder's process is actually alive, not just
/// that its recorded status says so. Fixes the long-standing bug where this
/// endpoint reported 200 regardless of whether the supervised child had
/// already exited out from under the instance state.
pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let mut process_count = 0usize;
    let mut all_live = true;

    let decoder_statuses: Vec<Value> = state
        .registry
        .all_mode_ids()
        .iter()
        .map(|mode_id| {
            let report = decoder::status(&state.registry, *mode_id);
            if report.status != InstanceStatus::Running {
                return json!({"mode": report.mode, "status": report.status});
            }

            let handle = {
                let inst = state.registry.instance(*mode_id);
                inst.lock().expect("instance mutex poisoned").process_handle
            };
            let alive = handle
                .map(|h| matches!(state.registry.supervisor.poll(h), PollResult::Running))
                .unwrap_or(false);

            if alive {
                process_count += 1;
            } else {
                all_live = false;
            }
            json!({"mode": report.mode, "status": report.status, "processAlive": alive})
        })
        .collect();

    let body = json!({
        "uptime": state.registry.uptime_seconds(),
        "processCount": process_count,
        "decoderStatuses": decoder_statuses,
    });

    let status_code = if all_live { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(body))
}

pub async fn post_killall(State(state): State<AppState>) -> impl IntoResponse {
    let stopped: Vec<&'static str> = decoder::killall(&state.registry)
        .await
        .into_iter()
        .map(ModeId::as_str)
        .collect();
    Json(json!({"status": "ok", "stopped": stopped}))
}
