use std::sync::Arc;

use crate::decoder::DecoderRegistry;

/// Shared application state, the same `#[derive(Clone)] struct AppState`
/// shape `hut8-soar`'s `web.rs` wires through `with_state`, generalized from
/// a database pool to the decoder registry.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DecoderRegistry>,
}
