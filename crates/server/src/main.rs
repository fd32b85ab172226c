use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use server_api::{match_updated_event, ApiContext};
use shared::{
    domain::{LeaderboardEntry, MatchDocument, MatchId, PlayerId, PlayerStats},
    error::{ApiError, ErrorCode},
    protocol::{
        CreateMatchRequest, IncrementStatRequest, ServerEvent, UpdateMatchRequest,
        UpdateMatchResponse,
    },
};
use storage::Storage;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

const DEFAULT_WAITING_LIMIT: u32 = 1;
const DEFAULT_LEADERBOARD_LIMIT: u32 = 10;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    match_id: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState::new(ApiContext { storage }, settings.event_buffer);
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "match store listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/matches", post(http_create_match))
        .route("/matches/waiting", get(http_list_waiting))
        .route("/matches/:match_id", get(http_get_match))
        .route("/matches/:match_id/update", post(http_update_match))
        .route("/stats/:player_id", get(http_get_stats).post(http_create_stats))
        .route("/stats/:player_id/increment", post(http_increment_stat))
        .route("/leaderboard", get(http_leaderboard))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> ApiResult<&'static str> {
    state.api.storage.health_check().await.map_err(|e| {
        error_response(ApiError::new(ErrorCode::Unavailable, e.to_string()))
    })?;
    Ok("ok")
}

async fn http_create_match(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateMatchRequest>,
) -> ApiResult<Json<MatchDocument>> {
    let document = server_api::create_match(&state.api, &req.player_x)
        .await
        .map_err(error_response)?;
    state.publish(match_updated_event(&document));
    Ok(Json(document))
}

async fn http_list_waiting(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Json<Vec<MatchDocument>>> {
    let matches =
        server_api::list_waiting_matches(&state.api, q.limit.unwrap_or(DEFAULT_WAITING_LIMIT))
            .await
            .map_err(error_response)?;
    Ok(Json(matches))
}

async fn http_get_match(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<i64>,
) -> ApiResult<Json<MatchDocument>> {
    let document = server_api::get_match(&state.api, MatchId(match_id))
        .await
        .map_err(error_response)?;
    Ok(Json(document))
}

async fn http_update_match(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<i64>,
    Json(req): Json<UpdateMatchRequest>,
) -> ApiResult<Json<UpdateMatchResponse>> {
    let response = server_api::update_match(&state.api, MatchId(match_id), &req)
        .await
        .map_err(error_response)?;
    if response.applied {
        state.publish(match_updated_event(&response.document));
    }
    Ok(Json(response))
}

async fn http_get_stats(
    State(state): State<Arc<AppState>>,
    Path(player_id): Path<String>,
) -> ApiResult<Json<PlayerStats>> {
    let stats = server_api::get_stats(&state.api, &PlayerId(player_id))
        .await
        .map_err(error_response)?;
    Ok(Json(stats))
}

async fn http_create_stats(
    State(state): State<Arc<AppState>>,
    Path(player_id): Path<String>,
    Json(initial): Json<PlayerStats>,
) -> ApiResult<StatusCode> {
    server_api::create_stats(&state.api, &PlayerId(player_id), initial)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::CREATED)
}

async fn http_increment_stat(
    State(state): State<Arc<AppState>>,
    Path(player_id): Path<String>,
    Json(req): Json<IncrementStatRequest>,
) -> ApiResult<Json<PlayerStats>> {
    let stats = server_api::increment_stat(&state.api, &PlayerId(player_id), req.stat)
        .await
        .map_err(error_response)?;
    Ok(Json(stats))
}

async fn http_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Json<Vec<LeaderboardEntry>>> {
    let entries =
        server_api::leaderboard(&state.api, q.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT))
            .await
            .map_err(error_response)?;
    Ok(Json(entries))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket, MatchId(q.match_id)))
}

/// Streams `match_updated` events for one match. The current document is
/// sent first so a new subscriber starts from the store's state.
async fn ws_connection(state: Arc<AppState>, socket: WebSocket, match_id: MatchId) {
    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();
    debug!(match_id = match_id.0, "match subscriber connected");

    let send_task = tokio::spawn(async move {
        let initial = match server_api::get_match(&state.api, match_id).await {
            Ok(document) => match_updated_event(&document),
            Err(err) => ServerEvent::Error(err),
        };
        if send_event(&mut sender, &initial).await.is_err() {
            return;
        }

        loop {
            let event = match events_rx.recv().await {
                Ok(event) if event.match_id() == Some(match_id) => event,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(match_id = match_id.0, skipped, "match subscriber lagged; resending snapshot");
                    match server_api::get_match(&state.api, match_id).await {
                        Ok(document) => match_updated_event(&document),
                        Err(err) => ServerEvent::Error(err),
                    }
                }
                Err(RecvError::Closed) => break,
            };
            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        if matches!(msg, WsMessage::Close(_)) {
            break;
        }
    }

    send_task.abort();
    debug!(match_id = match_id.0, "match subscriber disconnected");
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let Ok(text) = serde_json::to_string(event) else {
        return Ok(());
    };
    sender.send(WsMessage::Text(text)).await
}

fn error_response(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
