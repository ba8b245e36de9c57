//! `/api/admin/*`
//!
//! Every route needs a session and, except `validate-password`, the admin
//! password in the body. An empty `ADMIN_PASSWORD` turns admin off.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use dtxt_auth::open_seconds;
use dtxt_core::{DtxtError, UserId};
use dtxt_migrate::legacy::old_root;
use dtxt_migrate::read_legacy_registry;
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

use crate::error::{ApiError, ApiResult};
use crate::extract::AuthUser;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct ValidateBody {
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize)]
pub struct AdminBody {
    #[serde(default)]
    pub admin_password: String,
}

#[derive(Deserialize)]
pub struct DeleteUserBody {
    #[serde(default)]
    pub admin_password: String,
    pub user_id: UserId,
}

#[derive(Deserialize)]
pub struct OpenRegistrationBody {
    #[serde(default)]
    pub admin_password: String,
    pub seconds: Option<i64>,
}

fn admin_password_matches(state: &AppState, supplied: &str) -> bool {
    let configured = state.config.auth.admin_password.as_bytes();
    !configured.is_empty() && bool::from(configured.ct_eq(supplied.as_bytes()))
}

fn require_admin(state: &AppState, user: &AuthUser, supplied: &str) -> ApiResult<()> {
    if admin_password_matches(state, supplied) {
        return Ok(());
    }
    tracing::warn!(user_id = user.user_id, "admin password rejected");
    Err(ApiError::text(StatusCode::UNAUTHORIZED, "Invalid admin password"))
}

pub async fn validate_password(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(body): Json<ValidateBody>,
) -> Json<Value> {
    Json(json!({ "valid": admin_password_matches(&state, &body.password) }))
}

pub async fn get_data(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<AdminBody>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &user, &body.admin_password)?;

    let users = state.accounts.registry().list_users().await?;
    let data_path = &state.config.storage.data_path;
    let old_exists = tokio::fs::try_exists(old_root(data_path))
        .await
        .map_err(DtxtError::from)?;
    let old_data = if old_exists {
        let usernames: Vec<String> = read_legacy_registry(data_path)
            .await?
            .users
            .into_iter()
            .map(|u| u.username)
            .collect();
        json!({ "exists": true, "usernames": usernames })
    } else {
        json!({ "exists": false })
    };
    Ok(Json(json!({ "users": users, "old_data": old_data })))
}

pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<DeleteUserBody>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &user, &body.admin_password)?;
    match state.accounts.registry().delete_user(body.user_id).await {
        Ok(()) => {
            tracing::info!(admin = user.user_id, user_id = body.user_id, "user deleted by admin");
            Ok(Json(json!({ "success": true })))
        }
        Err(DtxtError::UserNotFound) => Err(ApiError::text(StatusCode::NOT_FOUND, "User not found")),
        Err(e) => Err(e.into()),
    }
}

pub async fn delete_old_data(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<AdminBody>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &user, &body.admin_password)?;
    let old = old_root(&state.config.storage.data_path);
    if !tokio::fs::try_exists(&old).await.map_err(DtxtError::from)? {
        return Err(ApiError::text(StatusCode::NOT_FOUND, "Old directory does not exist"));
    }
    tokio::fs::remove_dir_all(&old)
        .await
        .map_err(DtxtError::from)?;
    tracing::warn!(admin = user.user_id, "legacy data directory removed");
    Ok(Json(json!({ "success": true })))
}

pub async fn open_registration(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<OpenRegistrationBody>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &user, &body.admin_password)?;
    let requested = body.seconds.and_then(|s| u64::try_from(s).ok());
    let until = state.accounts.gate().open_for(requested);
    Ok(Json(json!({
        "success": true,
        "until": until.to_rfc3339(),
        "duration": open_seconds(requested),
    })))
}
