/// Mixer operations on the connected console.
///
/// Channel classes in paths use the wire spelling (`IN`, `OUT`, `STIN`),
/// case-insensitive.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use monmix_protocol::ChannelClass;

use super::failure;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LevelBody {
    pub db: f32,
}

#[derive(Debug, Deserialize)]
pub struct MuteBody {
    pub muted: bool,
}

#[derive(Debug, Deserialize)]
pub struct PresetBody {
    pub preset: u16,
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub db: f32,
    /// Adjust the bus gain instead if the console rejects the send
    #[serde(default)]
    pub fallback: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendQuery {
    #[serde(default)]
    pub fallback: bool,
}

fn parse_class(raw: &str) -> Result<ChannelClass, Json<Value>> {
    raw.parse::<ChannelClass>().map_err(|e| Json(failure(e)))
}

pub async fn get_gain(
    State(state): State<AppState>,
    Path((class, n)): Path<(String, u16)>,
) -> Json<Value> {
    let class = match parse_class(&class) {
        Ok(class) => class,
        Err(body) => return body,
    };
    match state.client().get_gain(class, n).await {
        Ok(db) => Json(json!({ "class": class, "channel": n, "db": db })),
        Err(e) => Json(failure(e)),
    }
}

pub async fn set_gain(
    State(state): State<AppState>,
    Path((class, n)): Path<(String, u16)>,
    Json(body): Json<LevelBody>,
) -> Json<Value> {
    let class = match parse_class(&class) {
        Ok(class) => class,
        Err(body) => return body,
    };
    match state.client().set_gain(class, n, body.db).await {
        Ok(db) => Json(json!({ "success": true, "class": class, "channel": n, "db": db })),
        Err(e) => Json(failure(e)),
    }
}

pub async fn get_send(
    State(state): State<AppState>,
    Path((class, n, bus)): Path<(String, u16, u16)>,
    Query(query): Query<SendQuery>,
) -> Json<Value> {
    let class = match parse_class(&class) {
        Ok(class) => class,
        Err(body) => return body,
    };
    match state.client().get_send(class, n, bus).await {
        Ok(db) => Json(json!({ "class": class, "channel": n, "bus": bus, "db": db })),
        Err(e) if query.fallback && !e.is_transport() => {
            debug!(%class, channel = n, bus, error = %e, "Send read failed, reading bus gain");
            match state.client().get_gain(ChannelClass::Output, bus).await {
                Ok(db) => Json(json!({
                    "class": class, "channel": n, "bus": bus, "db": db, "fallback": true,
                })),
                Err(e) => Json(failure(e)),
            }
        }
        Err(e) => Json(failure(e)),
    }
}

/// The send command is undocumented on real hardware. With `fallback`
/// set, a rejected or unanswered send adjusts the bus gain instead.
pub async fn set_send(
    State(state): State<AppState>,
    Path((class, n, bus)): Path<(String, u16, u16)>,
    Json(body): Json<SendBody>,
) -> Json<Value> {
    let class = match parse_class(&class) {
        Ok(class) => class,
        Err(body) => return body,
    };
    match state.client().set_send(class, n, bus, body.db).await {
        Ok(db) => Json(json!({
            "success": true, "class": class, "channel": n, "bus": bus, "db": db,
        })),
        Err(e) if body.fallback && !e.is_transport() => {
            debug!(%class, channel = n, bus, error = %e, "Send failed, falling back to bus gain");
            match state.client().set_gain(ChannelClass::Output, bus, body.db).await {
                Ok(db) => Json(json!({
                    "success": true, "class": class, "channel": n, "bus": bus, "db": db,
                    "fallback": true,
                })),
                Err(e) => Json(failure(e)),
            }
        }
        Err(e) => Json(failure(e)),
    }
}

pub async fn set_mute(
    State(state): State<AppState>,
    Path((class, n)): Path<(String, u16)>,
    Json(body): Json<MuteBody>,
) -> Json<Value> {
    let class = match parse_class(&class) {
        Ok(class) => class,
        Err(body) => return body,
    };
    match state.client().set_mute(class, n, body.muted).await {
        Ok(()) => Json(json!({ "success": true, "class": class, "channel": n, "muted": body.muted })),
        Err(e) => Json(failure(e)),
    }
}

pub async fn get_preset(State(state): State<AppState>) -> Json<Value> {
    match state.client().get_preset().await {
        Ok(preset) => Json(json!({ "preset": preset })),
        Err(e) => Json(failure(e)),
    }
}

pub async fn set_preset(
    State(state): State<AppState>,
    Json(body): Json<PresetBody>,
) -> Json<Value> {
    match state.client().set_preset(body.preset).await {
        Ok(()) => Json(json!({ "success": true, "preset": body.preset })),
        Err(e) => Json(failure(e)),
    }
}

pub async fn get_vu(
    State(state): State<AppState>,
    Path((class, n)): Path<(String, u16)>,
) -> Json<Value> {
    let class = match parse_class(&class) {
        Ok(class) => class,
        Err(body) => return body,
    };
    match state.client().get_meter(class, n).await {
        Ok(reading) => Json(json!({
            "class": class, "channel": n, "db": reading.level_db, "peak_db": reading.peak_db,
        })),
        Err(e) => Json(failure(e)),
    }
}
