//! `/api/shared/*`: read-only access through a share token

use axum::extract::{OriginalUri, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, SET_COOKIE};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dtxt_auth::share::{EVENT_ACCESS, EVENT_CODE_REQUESTED, EVENT_VERIFIED};
use dtxt_auth::{normalize_email, MarkedDays, ShareAccess, VerificationStatus};
use dtxt_core::{DtxtError, SHARE_VERIFICATION_COOKIE};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cookies;
use crate::error::{ApiError, ApiResult};
use crate::extract::{ClientIp, SharedLink};
use crate::server::AppState;

#[derive(Deserialize)]
pub struct EmailBody {
    #[serde(default)]
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyBody {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Deserialize)]
pub struct MonthQuery {
    pub year: i32,
    pub month: u32,
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct FileQuery {
    pub uuid: String,
    pub email: Option<String>,
}

/// Second-factor gate shared by every data endpoint. Logs an `access` event
/// when the check applied.
async fn require_verified(
    state: &AppState,
    access: &ShareAccess,
    headers: &HeaderMap,
    requested_email: Option<&str>,
    ip: &str,
    path: &str,
) -> ApiResult<()> {
    let cookie = cookies::read(headers, SHARE_VERIFICATION_COOKIE);
    let verified = state
        .share
        .check_verified(access, cookie.as_deref(), requested_email)
        .await?;
    if let Some(email) = verified {
        state
            .share
            .log_access(access.user_id, &email, ip, EVENT_ACCESS, path)
            .await;
    }
    Ok(())
}

pub async fn verification_status(
    State(state): State<AppState>,
    SharedLink(access): SharedLink,
    headers: HeaderMap,
) -> ApiResult<Json<VerificationStatus>> {
    let cookie = cookies::read(&headers, SHARE_VERIFICATION_COOKIE);
    Ok(Json(
        state
            .share
            .verification_status(&access, cookie.as_deref())
            .await?,
    ))
}

pub async fn request_code(
    State(state): State<AppState>,
    SharedLink(access): SharedLink,
    ClientIp(ip): ClientIp,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<EmailBody>,
) -> ApiResult<Json<Value>> {
    match state.share.request_code(&access, &body.email).await {
        Ok(()) => {}
        Err(DtxtError::Smtp(reason)) => {
            tracing::error!(user_id = access.user_id, "verification mail failed: {reason}");
            return Err(ApiError::text(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to send verification code",
            ));
        }
        Err(e) => return Err(e.into()),
    }
    state
        .share
        .log_access(
            access.user_id,
            &normalize_email(&body.email),
            &ip,
            EVENT_CODE_REQUESTED,
            uri.path(),
        )
        .await;
    Ok(Json(json!({ "success": true })))
}

pub async fn verify_code(
    State(state): State<AppState>,
    SharedLink(access): SharedLink,
    ClientIp(ip): ClientIp,
    OriginalUri(uri): OriginalUri,
    Json(body): Json<VerifyBody>,
) -> ApiResult<Response> {
    let (value, expires) = match state
        .share
        .verify_code(&access, &body.email, &body.code)
        .await
    {
        Ok(signed) => signed,
        Err(DtxtError::InvalidInput(_)) => {
            return Err(ApiError::bad_request("Invalid email or code"));
        }
        Err(e) => return Err(e.into()),
    };
    state
        .share
        .log_access(
            access.user_id,
            &normalize_email(&body.email),
            &ip,
            EVENT_VERIFIED,
            uri.path(),
        )
        .await;
    Ok((
        [(SET_COOKIE, cookies::set(SHARE_VERIFICATION_COOKIE, &value, expires))],
        Json(json!({ "success": true })),
    )
        .into_response())
}

pub async fn marked_days(
    State(state): State<AppState>,
    SharedLink(access): SharedLink,
    ClientIp(ip): ClientIp,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<MonthQuery>,
) -> ApiResult<Json<MarkedDays>> {
    require_verified(&state, &access, &headers, query.email.as_deref(), &ip, uri.path()).await?;
    Ok(Json(
        state
            .share
            .marked_days(&access, query.year, query.month)
            .await?,
    ))
}

pub async fn load_month_for_reading(
    State(state): State<AppState>,
    SharedLink(access): SharedLink,
    ClientIp(ip): ClientIp,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<MonthQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    require_verified(&state, &access, &headers, query.email.as_deref(), &ip, uri.path()).await?;
    Ok(Json(
        state
            .share
            .month_for_reading(&access, query.year, query.month)
            .await?,
    ))
}

pub async fn download_file(
    State(state): State<AppState>,
    SharedLink(access): SharedLink,
    ClientIp(ip): ClientIp,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<FileQuery>,
) -> ApiResult<Response> {
    require_verified(&state, &access, &headers, query.email.as_deref(), &ip, uri.path()).await?;
    let bytes = state.share.download_file(&access, &query.uuid).await?;
    Ok((
        [
            (CONTENT_TYPE, "application/octet-stream"),
            (CONTENT_DISPOSITION, "attachment"),
        ],
        bytes,
    )
        .into_response())
}
