//! `/api/users/*`

use axum::extract::{Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dtxt_auth::{load_settings, save_settings, ChangePassword, ChangeUsername, RegistrationStatus};
use dtxt_core::{UserId, SESSION_COOKIE};
use dtxt_crypto::Key32;
use dtxt_migrate::{MigrationPhase, MigrationProgress};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::cookies;
use crate::error::{ApiError, ApiResult};
use crate::extract::AuthUser;
use crate::server::AppState;

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct PasswordBody {
    pub password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordBody {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ChangeUsernameBody {
    pub new_username: String,
    pub password: String,
}

fn secret(value: String) -> SecretString {
    SecretString::from(value)
}

#[derive(Deserialize)]
pub struct UsernameQuery {
    #[serde(default)]
    pub username: String,
}

/// `Set-Cookie` for a fresh session.
fn session_cookie(
    state: &AppState,
    user_id: UserId,
    username: &str,
    derived: &Key32,
) -> ApiResult<String> {
    let (token, expires) = state.sessions.issue(user_id, username, derived)?;
    Ok(cookies::set(SESSION_COOKIE, &token, expires))
}

pub async fn login(State(state): State<AppState>, Json(body): Json<Credentials>) -> ApiResult<Response> {
    let outcome = match state.accounts.login(&body.username, &secret(body.password)).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_auth_failure() => {
            tracing::info!(username = %body.username, "login failed: {e}");
            return Err(ApiError::text(
                StatusCode::NOT_FOUND,
                "User/Password combination not found",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let cookie = session_cookie(
        &state,
        outcome.user_id,
        &outcome.username,
        &outcome.unlocked.derived,
    )?;
    let body = json!({
        "migration_started": false,
        "username": outcome.username,
        "available_backup_codes": outcome.unlocked.available_backup_codes(),
    });
    Ok(([(SET_COOKIE, cookie)], Json(body)).into_response())
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> ApiResult<Json<Value>> {
    state.accounts.register(&body.username, &secret(body.password)).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn logout() -> Response {
    (
        [(SET_COOKIE, cookies::clear(SESSION_COOKIE))],
        Json(json!({ "success": true })),
    )
        .into_response()
}

pub async fn check(user: AuthUser) -> Json<Value> {
    Json(json!({ "user_id": user.user_id, "username": user.username }))
}

pub async fn is_registration_allowed(State(state): State<AppState>) -> Json<RegistrationStatus> {
    Json(state.accounts.gate().status())
}

pub async fn migration_progress(
    State(state): State<AppState>,
    Query(query): Query<UsernameQuery>,
) -> ApiResult<Json<Value>> {
    let username = query.username.trim();
    if username.is_empty() {
        return Err(ApiError::unauthorized());
    }
    let tracker = state.accounts.migrator().tracker();
    let body = match tracker.get(username) {
        Some(progress) => json!({
            "migration_in_progress": tracker.is_active(username)
                && progress.phase != MigrationPhase::Completed,
            "progress": progress,
        }),
        None => json!({
            "migration_in_progress": false,
            "progress": MigrationProgress::not_started(),
        }),
    };
    Ok(Json(body))
}

pub async fn get_user_settings(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Map<String, Value>>> {
    let dek = state.keys.get_dek(user.user_id, &user.derived).await?;
    Ok(Json(load_settings(&state.journal, user.user_id, &dek).await?))
}

pub async fn save_user_settings(
    State(state): State<AppState>,
    user: AuthUser,
    Json(patch): Json<Map<String, Value>>,
) -> ApiResult<Json<Value>> {
    let dek = state.keys.get_dek(user.user_id, &user.derived).await?;
    save_settings(&state.journal, user.user_id, &dek, patch).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ChangePasswordBody>,
) -> ApiResult<Response> {
    let outcome = state
        .accounts
        .change_password(
            user.user_id,
            &secret(body.old_password),
            &secret(body.new_password),
        )
        .await?;
    match outcome {
        ChangePassword::PasswordIncorrect => {
            let left = state
                .accounts
                .registry()
                .require(user.user_id)
                .await?
                .backup_codes
                .len();
            Ok(Json(json!({
                "success": false,
                "password_incorrect": true,
                "available_backup_codes": left,
            }))
            .into_response())
        }
        ChangePassword::Changed { derived } => {
            let cookie = session_cookie(&state, user.user_id, &user.username, &derived)?;
            Ok(([(SET_COOKIE, cookie)], Json(json!({ "success": true }))).into_response())
        }
    }
}

pub async fn change_username(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ChangeUsernameBody>,
) -> ApiResult<Response> {
    let outcome = match state
        .accounts
        .change_username(user.user_id, &body.new_username, &secret(body.password))
        .await
    {
        Ok(outcome) => outcome,
        Err(dtxt_core::DtxtError::InvalidInput(message)) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "message": message })),
            )
                .into_response());
        }
        Err(e) => return Err(e.into()),
    };

    let response = match outcome {
        ChangeUsername::UsernameTaken => {
            Json(json!({ "success": false, "username_taken": true })).into_response()
        }
        ChangeUsername::PasswordIncorrect => {
            Json(json!({ "success": false, "password_incorrect": true })).into_response()
        }
        ChangeUsername::Changed => {
            // the session names the user, so it is reissued
            let cookie = session_cookie(
                &state,
                user.user_id,
                body.new_username.trim(),
                &user.derived,
            )?;
            ([(SET_COOKIE, cookie)], Json(json!({ "success": true }))).into_response()
        }
    };
    Ok(response)
}

pub async fn delete_account(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<PasswordBody>,
) -> ApiResult<Response> {
    if !state
        .accounts
        .delete_account(user.user_id, &secret(body.password))
        .await?
    {
        return Ok(Json(json!({ "success": false, "password_incorrect": true })).into_response());
    }
    Ok((
        [(SET_COOKIE, cookies::clear(SESSION_COOKIE))],
        Json(json!({ "success": true })),
    )
        .into_response())
}

pub async fn create_backup_codes(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<PasswordBody>,
) -> ApiResult<Json<Value>> {
    let Some(codes) = state
        .accounts
        .create_backup_codes(user.user_id, &secret(body.password))
        .await?
    else {
        return Ok(Json(json!({ "success": false, "password_incorrect": true })));
    };
    Ok(Json(json!({
        "success": true,
        "available_backup_codes": codes.len(),
        "backup_codes": codes,
    })))
}

pub async fn validate_password(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<PasswordBody>,
) -> ApiResult<Json<Value>> {
    let body = match state
        .accounts
        .check_password(user.user_id, &secret(body.password))
        .await?
    {
        Some(unlocked) => json!({
            "valid": true,
            "available_backup_codes": unlocked.available_backup_codes(),
        }),
        None => json!({ "valid": false, "available_backup_codes": -1 }),
    };
    Ok(Json(body))
}
