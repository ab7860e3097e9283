//! Courier server.
//!
//! Wires config, composer, engine and the HTTP front door together, and hosts
//! the `doctor` and `preview` commands.

use crate::config::CourierConfig;
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use courier_browser::ChromiumLauncher;
use courier_core::{
    Composer, NotificationDispatcher, PhraseMatrix, Recipient, SessionManager, SurfaceLauncher,
    deep_link,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub dispatcher: NotificationDispatcher,
}

pub async fn serve(config_path: Option<PathBuf>, force_presentation: bool) -> Result<()> {
    let (mut cfg, path) = CourierConfig::load_with_path(config_path).await?;
    if force_presentation {
        cfg.engine.presentation_mode = true;
    }
    tracing::info!(
        config_path = ?path,
        presentation_mode = cfg.engine.presentation_mode,
        surface_url = %cfg.engine.surface_url,
        "config loaded"
    );

    let addr = cfg.bind_addr()?;
    let listener = preflight_bind_listener(addr).await?;

    let composer = Arc::new(Composer::from_path(
        cfg.phrase_matrix_path()?.as_deref(),
        cfg.composer.fallback_template.clone(),
    ));
    let launcher: Arc<dyn SurfaceLauncher> = Arc::new(ChromiumLauncher::default());
    let engine = Arc::new(SessionManager::new(
        launcher,
        cfg.send_protocol(),
        cfg.engine_settings()?,
    ));

    let shutdown = CancellationToken::new();
    let engine_handle = engine.start(shutdown.child_token());
    tracing::info!(
        profile_dir = %engine.settings().launch.profile_dir.display(),
        max_retries = engine.settings().max_retries,
        "engine started"
    );

    let dispatcher = NotificationDispatcher::new(
        composer,
        cfg.dial_plan(),
        engine,
        cfg.composer.default_customer_name.clone(),
    );
    let state = Arc::new(AppState { dispatcher });
    let app = build_app(state, &cfg);

    tracing::info!(%addr, "courier serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    match engine_handle.await {
        Ok(()) => tracing::info!("engine shutdown completed"),
        Err(e) => tracing::error!(error = %e, "engine task join failed during shutdown"),
    }
    Ok(())
}

pub fn build_app(state: Arc<AppState>, cfg: &CourierConfig) -> axum::Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    routes::router()
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = CourierConfig::load_with_path(config_path).await?;
    let launch = cfg.launch_options()?;
    tracing::info!(
        config_path = ?path,
        bind_addr = %cfg.server.bind_addr,
        surface_url = %cfg.engine.surface_url,
        profile_dir = %launch.profile_dir.display(),
        profile_exists = launch.profile_dir.is_dir(),
        "config ok"
    );

    match cfg.phrase_matrix_path()? {
        Some(matrix_path) => {
            let matrix = PhraseMatrix::load(&matrix_path)?;
            let mut statuses: Vec<&str> = matrix.status_keys().collect();
            statuses.sort_unstable();
            tracing::info!(path = %matrix_path.display(), ?statuses, "phrase matrix ok");
        }
        None => tracing::warn!("no phrase matrix configured; every message uses the fallback template"),
    }

    if let Some(executable) = &launch.executable {
        if !executable.exists() {
            return Err(anyhow::anyhow!(
                "engine.chrome_executable {} does not exist",
                executable.display()
            ));
        }
    }
    if !launch.profile_dir.is_dir() {
        tracing::warn!("profile directory missing; run `courier login` to sign in once");
    }
    Ok(())
}

pub async fn preview(
    config_path: Option<PathBuf>,
    phone: &str,
    status: &str,
    name: Option<&str>,
) -> Result<()> {
    let (cfg, _) = CourierConfig::load_with_path(config_path).await?;
    let composer = Composer::from_path(
        cfg.phrase_matrix_path()?.as_deref(),
        cfg.composer.fallback_template.clone(),
    );
    let recipient = Recipient::parse(phone, &cfg.dial_plan())?;
    let customer = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(cfg.composer.default_customer_name.as_str());
    let message = composer.compose(status, customer);

    println!("recipient: {recipient}");
    println!("message:   {message}");
    println!("deep link: {}", deep_link(&cfg.engine.surface_url, &recipient, &message));
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind {addr}: {e}"))?;
    tracing::info!(%addr, "listener bound");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
                Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
            },
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}
