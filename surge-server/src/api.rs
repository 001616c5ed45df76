//! REST surface: discovery, configuration, liveness

use crate::protocol::MethodInfo;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Raw directory texts, base64-coded for transit.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigurationBlobs {
    pub proxies: String,
    pub uas: String,
}

pub async fn list_methods(State(state): State<AppState>) -> Json<Vec<MethodInfo>> {
    Json(state.registry.list().into_iter().map(MethodInfo::from).collect())
}

pub async fn get_configuration(State(state): State<AppState>) -> Json<ConfigurationBlobs> {
    let (proxies, uas) = state.store.raw_texts();
    Json(ConfigurationBlobs {
        proxies: STANDARD.encode(proxies),
        uas: STANDARD.encode(uas),
    })
}

pub async fn put_configuration(
    State(state): State<AppState>,
    Json(blobs): Json<ConfigurationBlobs>,
) -> Result<StatusCode, (StatusCode, String)> {
    let proxies = decode_text(&blobs.proxies).map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    let uas = decode_text(&blobs.uas).map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    state.store.replace(&proxies, &uas).map_err(|e| {
        warn!(error = %e, "Configuration replace failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health() -> &'static str {
    "ok"
}

fn decode_text(blob: &str) -> Result<String, String> {
    let bytes = STANDARD
        .decode(blob)
        .map_err(|e| format!("invalid base64: {e}"))?;
    String::from_utf8(bytes).map_err(|e| format!("not valid utf-8: {e}"))
}
