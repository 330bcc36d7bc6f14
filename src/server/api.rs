//! Control plane handlers
//!
//! Bodies are read as raw JSON rather than through typed extractors: a body
//! that parses is applied key by key and whatever succeeded is reported back,
//! only unparseable JSON is refused outright.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};
use tracing::debug;

use super::AppState;
use crate::controls::{ControlUpdate, Meta, RequestedValue, QUALITY};
use crate::error::{Error, Result};
use crate::modes::ModePreset;

fn parse_body(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| Error::InvalidRequest(e.to_string()))
}

/// GET /meta
pub async fn meta(State(state): State<Arc<AppState>>) -> Json<Meta> {
    Json(state.registry.get_all())
}

/// GET /modes
pub async fn modes() -> Json<&'static BTreeMap<&'static str, ControlUpdate>> {
    Json(ModePreset::definitions())
}

/// POST /mode with `{"mode": "<name>"}`
pub async fn set_mode(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<Meta>> {
    let body = parse_body(&body)?;
    let name = match body.get("mode") {
        Some(Value::String(name)) => name.clone(),
        Some(other) => return Err(Error::UnknownMode(other.to_string())),
        None => {
            debug!("Mode body without a mode: {}", body);
            return Ok(Json(state.registry.get_all()));
        }
    };

    state.modes.apply(&name).await?;
    Ok(Json(state.registry.get_all()))
}

/// POST /controls with a partial `{"<id>": <value>}` mapping
pub async fn set_controls(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Meta>> {
    let update = match parse_body(&body)? {
        Value::Object(fields) => fields
            .into_iter()
            .map(|(id, v)| (id, RequestedValue::from(v)))
            .collect::<ControlUpdate>(),
        other => {
            debug!("Ignoring non-object control body: {}", other);
            ControlUpdate::new()
        }
    };

    state.registry.update(&update).await?;
    Ok(Json(state.registry.get_all()))
}

/// POST /quality with `{"quality": n}` or a bare number
pub async fn set_quality(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<Meta>> {
    let value = match parse_body(&body)? {
        Value::Object(mut fields) => {
            let found = fields.remove("quality").or_else(|| fields.remove(QUALITY));
            let Some(value) = found else {
                debug!("Quality body without a quality: {:?}", fields);
                return Ok(Json(state.registry.get_all()));
            };
            value
        }
        other => other,
    };

    let mut update = ControlUpdate::new();
    update.insert(QUALITY.to_string(), RequestedValue::from(value));
    state.registry.update(&update).await?;
    Ok(Json(state.registry.get_all()))
}

/// GET /healthz
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "capturing": state.registry.session().is_running(),
        "clients": state.buffer.reader_count(),
        "lastFrame": state.buffer.latest().map(|frame| frame.meta.sequence),
        "title": state.title,
    }))
}
