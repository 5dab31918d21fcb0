use crate::qbox_logic::config::Config;
use crate::qbox_logic::model::{ApiResponse, ReactionForm};
use crate::qbox_logic::state::AppState;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{rejection::PathRejection, Path, State},
    http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use lib_qbox::{BroadcastEvent, Frame, QuestionId, SubscriberConnection};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};

/// Frames queued between a connection task and its response body.
const TRANSPORT_QUEUE: usize = 16;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/sse", get(sse_handler))
        .route("/api/question/{id}/emoji", get(snapshot_handler).post(react_handler))
        .route("/api/emojis", get(emojis_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run(config: Config, app_state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));

    if let Some((cert_path, key_path)) = config.tls_paths() {
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("Failed to load TLS configuration")?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let hub = Arc::clone(&app_state.hub);
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            tracing::info!("Downstream server shutting down.");
            hub.close();
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        tracing::info!("Downstream server listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(router(app_state).into_make_service())
            .await?;
    } else {
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Downstream server listening on http://{}", addr);
        serve(listener, app_state, async move {
            shutdown.recv().await.ok();
        })
        .await?;
    }
    Ok(())
}

/// Serves plain HTTP on `listener` until `shutdown` resolves. The hub is
/// closed first so open streams end and the drain can finish.
pub async fn serve<F>(listener: TcpListener, app_state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let hub = Arc::clone(&app_state.hub);
    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("Downstream server shutting down.");
            hub.close();
        })
        .await
}

async fn sse_handler(State(state): State<AppState>) -> Response {
    let (transport, frames) = mpsc::channel::<Frame>(TRANSPORT_QUEUE);
    let handle = state.hub.register();
    let connection = SubscriberConnection::new(Arc::clone(&state.hub), handle, transport, state.stream.clone());
    tokio::spawn(connection.run());

    let stream = futures_util::stream::unfold(frames, |mut frames| async move {
        frames
            .recv()
            .await
            .map(|frame| (Ok::<_, Infallible>(frame.encode()), frames))
    });

    (
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache"),
            (CONNECTION, "keep-alive"),
        ],
        [("x-accel-buffering", "no")],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn react_handler(
    State(state): State<AppState>,
    id: Result<Path<QuestionId>, PathRejection>,
    form: ReactionForm,
) -> ApiResponse {
    let Ok(Path(question_id)) = id else {
        return ApiResponse::fail(400, "invalid question id");
    };
    match state.reactions.react(question_id, &form.emoji).await {
        Ok(set) => ApiResponse::success(BroadcastEvent::from(set)),
        Err(err) => err.into(),
    }
}

async fn snapshot_handler(
    State(state): State<AppState>,
    id: Result<Path<QuestionId>, PathRejection>,
) -> ApiResponse {
    let Ok(Path(question_id)) = id else {
        return ApiResponse::fail(400, "invalid question id");
    };
    match state.reactions.snapshot(question_id).await {
        Ok(set) => ApiResponse::success(BroadcastEvent::from(set)),
        Err(err) => err.into(),
    }
}

async fn emojis_handler(State(state): State<AppState>) -> ApiResponse {
    ApiResponse::success(state.reactions.whitelist().symbols())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = match state.reactions.store().check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            "degraded"
        }
    };
    Json(serde_json::json!({
        "status": status,
        "subscribers": state.hub.subscriber_count(),
        "store": state.reactions.store().kind(),
    }))
}
