//! Route handlers, one module per API area

pub mod admin;
pub mod share;
pub mod shared;
pub mod users;

use axum::Json;
use serde_json::{json, Value};

pub async fn version() -> Json<Value> {
    Json(json!({ "current_version": env!("CARGO_PKG_VERSION") }))
}
