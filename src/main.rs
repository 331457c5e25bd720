use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::IntoResponse;
use axum::{routing::get, Router};
use chrono::Utc;
use tower::ServiceBuilder;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod db;
mod error;
mod i18n;
mod middleware;
mod routes;
mod services;

use config::Config;
use error::AppError;
use services::assistant::Assistant;
use services::auth::AuthorizationHandshake;
use services::bot::{self, BotContext};
use services::calendar::CalendarTools;
use services::credentials::CredentialStore;
use services::google_calendar::{CalendarProvider, GoogleCalendarClient};
use services::google_oauth::{AuthorizationProvider, GoogleOAuthClient};
use services::init;
use services::ledger::ReminderLedger;
use services::refresh_gate::CredentialGate;
use services::reminders::{ReminderScheduler, ReminderSettings};
use services::telegram::TelegramService;

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub ledger: Arc<ReminderLedger>,
    pub scheduler: Arc<ReminderScheduler>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "hope_calendar=debug,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to bind SIGTERM, only Ctrl+C will stop the service: {}", e);
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    tracing::info!("Starting Hope calendar assistant");

    let pool = init::init_db(&config).await?;
    let timeout = config.request_timeout();

    // Credentials and the authorization flow
    let store = CredentialStore::new(pool.clone());
    let provider: Arc<dyn AuthorizationProvider> =
        Arc::new(GoogleOAuthClient::new(&config.google, timeout)?);
    let gate = CredentialGate::new(store.clone(), provider.clone(), timeout);
    let handshake = AuthorizationHandshake::new(provider, store, timeout);

    // Calendar access and the assistant on top of it
    let calendar: Arc<dyn CalendarProvider> = Arc::new(GoogleCalendarClient::new(
        config.google.calendar_api_url.clone(),
        timeout,
    )?);
    let tools = CalendarTools::new(
        calendar.clone(),
        config.google.calendar_id.clone(),
        config.timezone(),
        timeout,
    );
    let assistant = Assistant::from_config(&config.gemini, &config.sessions, tools.clone(), timeout)?
        .map(Arc::new);

    let telegram = TelegramService::new(config.telegram.bot_token.clone()).await?;
    if let Err(e) = telegram.register_commands().await {
        tracing::warn!("Failed to register bot commands: {}", e);
    }

    // Reminders
    let ledger = Arc::new(ReminderLedger::load(pool.clone(), Utc::now()).await?);
    let scheduler = Arc::new(ReminderScheduler::new(
        pool.clone(),
        gate.clone(),
        calendar,
        Arc::new(telegram.clone()),
        ledger.clone(),
        ReminderSettings {
            calendar_id: config.google.calendar_id.clone(),
            lookahead: config.lookahead(),
            concurrency: config.reminders.concurrency,
            timeout,
        },
    ));

    let app_state = Arc::new(AppState {
        db: pool.clone(),
        config: config.clone(),
        ledger,
        scheduler,
    });

    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let mut bg_handles = init::spawn_background_workers(app_state.clone(), shutdown_tx.clone());

    // Telegram dispatcher
    let bot_ctx = Arc::new(BotContext {
        pool: app_state.db.clone(),
        gate,
        handshake,
        tools,
        assistant,
        reminder_minutes: config.reminders.lookahead_minutes,
    });
    let mut dispatcher = bot::build_dispatcher(telegram.get_bot().clone(), bot_ctx);
    let bot_shutdown = dispatcher.shutdown_token();
    let bot_handle = tokio::spawn(async move {
        tracing::info!("Telegram dispatcher started");
        dispatcher.dispatch().await;
        tracing::info!("Telegram dispatcher stopped");
    });

    // Rate limiter for the public OAuth callback
    let mut callback_limit = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    callback_limit
        .per_second(config.rate_limit.callback_per_second.max(1))
        .burst_size(config.rate_limit.callback_burst.max(1))
        .error_handler(|error: GovernorError| -> http::Response<Body> {
            match error {
                GovernorError::TooManyRequests { wait_time, .. } => {
                    let mut resp = AppError::RateLimited.into_response();
                    if let Ok(value) = http::HeaderValue::from_str(&wait_time.to_string()) {
                        resp.headers_mut().insert(http::header::RETRY_AFTER, value);
                    }
                    resp
                }
                GovernorError::UnableToExtractKey => AppError::BadRequest(
                    "Unable to determine client IP for rate limiting".to_string(),
                )
                .into_response(),
                GovernorError::Other { msg, .. } => AppError::Internal(anyhow::anyhow!(
                    msg.unwrap_or_else(|| "Rate limiting error".to_string())
                ))
                .into_response(),
            }
        });
    let callback_gov_conf = Arc::new(
        callback_limit
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build OAuth callback governor config"))?,
    );

    {
        let limiter = callback_gov_conf.limiter().clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        bg_handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                }
                tracing::debug!("OAuth callback limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        }));
    }

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest(
            "/oauth",
            routes::oauth::router().layer(GovernorLayer {
                config: callback_gov_conf,
            }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::csp::csp_middleware)),
        );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(());
    let bot_stopping = bot_shutdown.shutdown().ok();

    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );
    let wait_all = async {
        if let Some(stopping) = bot_stopping {
            stopping.await;
        }
        let _ = bot_handle.await;
        for h in bg_handles {
            let _ = h.await;
        }
    };
    if tokio::time::timeout(shutdown_wait, wait_all).await.is_err() {
        tracing::warn!("Background workers did not stop in time");
    }

    app_state.db.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
