//! Server-sent event streaming from a mode's bus.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream;

use crate::decoder::ModeId;
use crate::error::CoreError;

use super::state::AppState;

fn resolve_mode(segment: &str) -> Result<ModeId, CoreError> {
    ModeId::from_path_segment(segment).ok_or_else(|| CoreError::InvalidInput {
        field: "mode".to_string(),
        message: format!("unknown mode {segment:?}"),
    })
}

pub async fn get_stream(
    State(state): State<AppState>,
    Path(mode): Path<String>,
) -> Result<impl IntoResponse, CoreError> {
    let mode_id = resolve_mode(&mode)?;
    let keepalive_seconds = state.registry.config.keepalive_seconds;
    let subscription = state.registry.bus_for(mode_id).subscribe();

    let events = stream::unfold(subscription, |subscription| async move {
        match subscription.receiver.recv_async().await {
            Ok(event) => {
                let frame = Event::default()
                    .event(event.event_type.clone())
                    .json_data(&event.payload)
                    .unwrap_or_else(|_| Event::default().event("error").data("serialization failed"));
                Some((Ok::<Event, Infallible>(frame), subscription))
            }
            Err(_) => None,
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(keepalive_seconds))))
}
