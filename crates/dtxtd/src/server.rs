//! Router, middleware and the serve loop

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use dtxt_auth::{Accounts, KeyService, Mailer, RegistrationGate, SessionSigner, ShareService};
use dtxt_core::DtxtConfig;
use dtxt_crypto::KdfParams;
use dtxt_migrate::{MigrationTracker, Migrator};
use dtxt_store::{JournalStore, RegistryStore};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use crate::handlers::{admin, share, shared, users, version};

/// Paths that may legitimately run longer than the request timeout.
const TIMEOUT_EXEMPT: &[&str] = &[
    "/api/users/login",
    "/api/shared/downloadFile",
];

/// Everything a handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DtxtConfig>,
    pub accounts: Arc<Accounts>,
    pub sessions: Arc<SessionSigner>,
    pub keys: Arc<KeyService>,
    pub share: Arc<ShareService>,
    pub journal: Arc<JournalStore>,
}

impl AppState {
    /// Wire the stores and services for `config`. `secret` signs session
    /// tokens and share verification cookies.
    pub fn new(config: DtxtConfig, secret: &[u8], mailer: Arc<dyn Mailer>) -> Self {
        let data_path = config.storage.data_path.clone();
        let indent = config.storage.indent;
        let kdf = KdfParams::from(&config.crypto);

        let registry = Arc::new(RegistryStore::new(&data_path, indent));
        let journal = Arc::new(JournalStore::new(&data_path, indent));
        let migrator = Arc::new(Migrator::new(
            &data_path,
            registry.clone(),
            journal.clone(),
            kdf.clone(),
            MigrationTracker::new(),
        ));
        let accounts = Accounts::new(
            registry.clone(),
            migrator,
            kdf,
            RegistrationGate::new(config.auth.allow_registration),
        );
        let share = ShareService::new(
            registry.clone(),
            journal.clone(),
            mailer,
            config.smtp.clone(),
            secret,
            &config.share,
        );

        Self {
            sessions: Arc::new(SessionSigner::new(secret, config.auth.logout_after_days)),
            keys: Arc::new(KeyService::new(registry)),
            accounts: Arc::new(accounts),
            share: Arc::new(share),
            journal,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    mount_api(api_routes(), state)
}

fn api_routes() -> Router<AppState> {
    let user_routes = Router::new()
        .route("/login", post(users::login))
        .route("/register", post(users::register))
        .route("/logout", get(users::logout))
        .route("/check", get(users::check))
        .route("/isRegistrationAllowed", get(users::is_registration_allowed))
        .route("/migrationProgress", get(users::migration_progress))
        .route("/getUserSettings", get(users::get_user_settings))
        .route("/saveUserSettings", post(users::save_user_settings))
        .route("/changePassword", post(users::change_password))
        .route("/changeUsername", post(users::change_username))
        .route("/deleteAccount", post(users::delete_account))
        .route("/createBackupCodes", post(users::create_backup_codes))
        .route("/validatePassword", post(users::validate_password));

    let share_routes = Router::new()
        .route("/generate", post(share::generate))
        .route("/revoke", post(share::revoke))
        .route("/info", get(share::info))
        .route(
            "/verificationSettings",
            get(share::get_verification_settings).post(share::save_verification_settings),
        )
        .route(
            "/smtpSettings",
            get(share::get_smtp_settings).post(share::save_smtp_settings),
        )
        .route("/testSmtp", post(share::test_smtp))
        .route("/accessLogs", get(share::access_logs))
        .route("/clearAccessLogs", post(share::clear_access_logs));

    let shared_routes = Router::new()
        .route("/verificationStatus", get(shared::verification_status))
        .route("/requestCode", post(shared::request_code))
        .route("/verifyCode", post(shared::verify_code))
        .route("/getMarkedDays", get(shared::marked_days))
        .route("/loadMonthForReading", get(shared::load_month_for_reading))
        .route("/downloadFile", get(shared::download_file));

    let admin_routes = Router::new()
        .route("/validate-password", post(admin::validate_password))
        .route("/get-data", post(admin::get_data))
        .route("/delete-user", post(admin::delete_user))
        .route("/delete-old-data", post(admin::delete_old_data))
        .route("/open-registration", post(admin::open_registration));

    Router::new()
        .route("/version", get(version))
        .nest("/users", user_routes)
        .nest("/share", share_routes)
        .nest("/shared", shared_routes)
        .nest("/admin", admin_routes)
}

/// Mount `api` under `/api` behind the timeout and request-log layers.
pub(crate) fn mount_api(api: Router<AppState>, state: AppState) -> Router {
    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(state.clone(), request_timeout))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

async fn request_timeout(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if TIMEOUT_EXEMPT.contains(&req.uri().path()) {
        return next.run(req).await;
    }
    let limit = Duration::from_secs(state.config.server.request_timeout_secs);
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "Request timeout").into_response(),
    }
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Serve until SIGINT or SIGTERM, then let in-flight requests finish for at
/// most `grace`.
pub async fn serve(listener: TcpListener, state: AppState, grace: Duration) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received"),
            _ = sigint.recv() => info!("SIGINT received"),
        }
        let _ = stop_tx.send(());
    });
    let mut handle = tokio::spawn(server.into_future());

    tokio::select! {
        joined = &mut handle => {
            return joined.context("server task")?.context("server");
        }
        _ = stop_rx => info!(grace_secs = grace.as_secs(), "shutting down, draining requests"),
    }

    match tokio::time::timeout(grace, &mut handle).await {
        Ok(joined) => joined.context("server task")?.context("server"),
        Err(_) => {
            warn!("drain period elapsed, dropping remaining connections");
            handle.abort();
            Ok(())
        }
    }
}
