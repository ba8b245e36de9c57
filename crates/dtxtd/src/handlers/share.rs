//! `/api/share/*`: the owner's view of their share link

use axum::extract::State;
use axum::Json;
use dtxt_auth::SmtpView;
use dtxt_core::{DtxtError, SmtpSettings, UserId};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::extract::AuthUser;
use crate::server::AppState;

/// What [`SmtpSettings::redacted`] puts in place of a password.
const REDACTED_PASSWORD: &str = "********";

#[derive(Deserialize)]
pub struct WhitelistBody {
    #[serde(default)]
    pub emails: Vec<String>,
}

#[derive(Deserialize)]
pub struct TestSmtpBody {
    pub to_email: String,
    #[serde(flatten)]
    pub settings: SmtpSettings,
}

/// A client echoing back the redacted password means "keep the stored one".
async fn restore_password(
    state: &AppState,
    user_id: UserId,
    mut settings: SmtpSettings,
) -> ApiResult<SmtpSettings> {
    if settings.password == REDACTED_PASSWORD {
        settings.password = state
            .accounts
            .registry()
            .get_smtp_settings(user_id)
            .await?
            .map(|stored| stored.password)
            .unwrap_or_default();
    }
    Ok(settings)
}

pub async fn generate(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let token = state.share.generate(user.user_id, &user.derived).await?;
    Ok(Json(json!({ "success": true, "token": token })))
}

pub async fn revoke(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    state.share.revoke(user.user_id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn info(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let has_token = state.share.has_token(user.user_id).await?;
    Ok(Json(json!({ "has_token": has_token })))
}

pub async fn get_verification_settings(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Value>> {
    let emails = state.share.whitelist(user.user_id).await?;
    let (smtp, _) = state.share.effective_smtp(user.user_id).await?;
    Ok(Json(json!({
        "emails": emails,
        "smtp_configured": smtp.is_configured(),
    })))
}

pub async fn save_verification_settings(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<WhitelistBody>,
) -> ApiResult<Json<Value>> {
    let emails = state.share.save_whitelist(user.user_id, &body.emails).await?;
    Ok(Json(json!({ "success": true, "emails": emails })))
}

pub async fn get_smtp_settings(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<SmtpView>> {
    Ok(Json(state.share.smtp_view(user.user_id).await?))
}

pub async fn save_smtp_settings(
    State(state): State<AppState>,
    user: AuthUser,
    Json(settings): Json<SmtpSettings>,
) -> ApiResult<Json<Value>> {
    let settings = restore_password(&state, user.user_id, settings).await?;
    let stored = state.share.save_smtp(user.user_id, settings).await?;
    Ok(Json(json!({
        "success": true,
        "settings": stored.map(|s| s.redacted()),
    })))
}

pub async fn test_smtp(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<TestSmtpBody>,
) -> ApiResult<Json<Value>> {
    let settings = restore_password(&state, user.user_id, body.settings).await?;
    match state
        .share
        .test_smtp(user.user_id, &body.to_email, settings)
        .await
    {
        Ok(()) => Ok(Json(json!({ "success": true }))),
        Err(DtxtError::Smtp(reason)) => {
            tracing::warn!(user_id = user.user_id, "test mail failed: {reason}");
            Err(ApiError::bad_request("Failed to send test email"))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn access_logs(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let logs = state.share.access_logs(user.user_id).await?;
    Ok(Json(json!({ "logs": logs })))
}

pub async fn clear_access_logs(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Value>> {
    state.share.clear_access_logs(user.user_id).await?;
    Ok(Json(json!({ "success": true })))
}
