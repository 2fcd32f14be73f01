//! HTTP API Layer

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket},
    extract::{Extension, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::events::{Event, EventBus};
use crate::scrape::types::Post;
use crate::store::Stores;
use crate::supervisor::{PipelineSupervisor, SupervisorError};

/// Shared handler state, injected via `Extension`.
pub struct ApiState {
    supervisor: Arc<PipelineSupervisor>,
    stores: Arc<Stores>,
    bus: EventBus,
}

pub fn create_router(
    supervisor: Arc<PipelineSupervisor>,
    stores: Arc<Stores>,
    bus: EventBus,
) -> Router {
    let state = Arc::new(ApiState {
        supervisor,
        stores,
        bus,
    });

    Router::new()
        .route("/", get(root))
        .route("/health", get(|| async { "ok" }))
        .route("/api/scraper/start", post(start_scraper))
        .route("/api/scraper/stop", post(stop_scraper))
        .route("/api/scraper/status", get(scraper_status))
        .route("/api/scraper/data", get(scraper_data))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::very_permissive())
        .layer(Extension(state))
}

async fn root() -> &'static str {
    "memecoin-radar: social sentiment + on-chain enrichment pipeline"
}

async fn start_scraper(Extension(state): Extension<Arc<ApiState>>) -> impl IntoResponse {
    match state.supervisor.start_scrape().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "success": true, "pid": std::process::id() })),
        ),
        Err(e @ (SupervisorError::AlreadyRunning | SupervisorError::Busy)) => (
            StatusCode::CONFLICT,
            Json(json!({ "success": false, "message": e.to_string() })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": e.to_string() })),
        ),
    }
}

async fn stop_scraper(Extension(state): Extension<Arc<ApiState>>) -> impl IntoResponse {
    match state.supervisor.stop_scrape() {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "scraper stopping" })),
        ),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(json!({ "success": false, "message": e.to_string() })),
        ),
    }
}

async fn scraper_status(Extension(state): Extension<Arc<ApiState>>) -> impl IntoResponse {
    let running = state.supervisor.is_scraping();
    let mut body = json!({ "running": running });
    if running {
        body["pid"] = json!(std::process::id());
    }
    Json(body)
}

async fn scraper_data(Extension(state): Extension<Arc<ApiState>>) -> impl IntoResponse {
    match state.stores.posts.read_array::<Post>().await {
        Ok(posts) => (
            StatusCode::OK,
            Json(json!({ "success": true, "count": posts.len(), "data": posts })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": format!("{e:#}") })),
        ),
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<ApiState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_handler(socket, state))
}

/// One duplex client: snapshot on connect, then the event stream. A
/// client that falls behind the bus buffer sees a `droppedEvents` marker
/// instead of the lost events. Inbound messages are logged only.
async fn ws_handler(mut socket: WebSocket, state: Arc<ApiState>) {
    // Subscribe before the snapshot so no event between the two is lost.
    let mut rx = state.bus.subscribe();

    let posts: Vec<Post> = state.stores.posts.read_array().await.unwrap_or_default();
    let snapshot = Event::InitialSnapshot { posts }.to_wire();
    if socket
        .send(Message::Text(snapshot.to_string()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    None | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(txt))) => {
                        match serde_json::from_str::<serde_json::Value>(&txt) {
                            Ok(v) => info!(message = %v, "client message"),
                            Err(_) => info!(message = %txt, "client message (unparsed)"),
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }

            event = rx.recv() => {
                let wire = match event {
                    Ok(ev) => ev.to_wire(),
                    Err(RecvError::Lagged(count)) => Event::DroppedEvents { count }.to_wire(),
                    Err(RecvError::Closed) => break,
                };
                if socket.send(Message::Text(wire.to_string())).await.is_err() {
                    break;
                }
            }
        }
    }
}
