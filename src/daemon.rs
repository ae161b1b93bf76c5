use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Json, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::{LedgerNode, LocalNetwork};
use crate::config::Config;
use crate::domains::message::{EntryStatus, MessageEntry, PartyId, StateRef};
use crate::domains::transition::TransitionId;
use crate::error::{LedgerError, Result};
use crate::services::daemon_client::{
    BroadcastMessageRequest, BroadcastRequest, ConsumeRequest, CreateMessagesRequest,
    ReplyRequest,
};

#[derive(Clone)]
pub struct AppState {
    pub network: Arc<LocalNetwork>,
    pub token: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

#[derive(Deserialize)]
struct MessagesQuery {
    status: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/messages", get(list_messages).post(create_messages))
        .route("/messages/consume", post(consume_message))
        .route("/messages/reply", post(reply_to_message))
        .route("/messages/broadcast", post(send_and_broadcast))
        .route("/transactions/:id", get(get_transaction))
        .route("/transactions/:id/broadcast", post(broadcast_transaction))
        .route("/events", get(events))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn create_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMessagesRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let result = async {
        let node = acting_node(&state, &headers)?;
        node.flows()
            .create_states(
                &payload.contents,
                &payload.recipient,
                payload.number_of_states_to_create,
            )
            .await
    }
    .await;
    match result {
        Ok(id) => id.to_string().into_response(),
        Err(err) => error_response(err),
    }
}

async fn consume_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ConsumeRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let result = async {
        let node = acting_node(&state, &headers)?;
        let tx_id: TransitionId = payload.tx_id.parse()?;
        node.flows()
            .consume_state(&tx_id, payload.index_to_consume)
            .await
    }
    .await;
    match result {
        Ok(id) => id.to_string().into_response(),
        Err(err) => error_response(err),
    }
}

async fn reply_to_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ReplyRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let result = async {
        let node = acting_node(&state, &headers)?;
        let reference = StateRef::new(payload.tx_id.parse()?, payload.index);
        let original = node.ledger().load_entry(&reference).await?;
        node.flows()
            .reply_to_message(
                &reference,
                node.identity().clone(),
                original.entry.sender,
                payload.contents,
            )
            .await
    }
    .await;
    match result {
        Ok(finalized) => finalized.id.to_string().into_response(),
        Err(err) => error_response(err),
    }
}

async fn send_and_broadcast(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BroadcastMessageRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let result = async {
        let node = acting_node(&state, &headers)?;
        let recipient = state.network.node(&payload.recipient)?.identity().clone();
        let message = MessageEntry::new(node.identity().clone(), recipient, payload.contents);
        node.flows().send_message_and_broadcast(message).await
    }
    .await;
    match result {
        Ok(finalized) => finalized.id.to_string().into_response(),
        Err(err) => error_response(err),
    }
}

async fn broadcast_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<BroadcastRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let result = async {
        let node = acting_node(&state, &headers)?;
        let tx_id: TransitionId = id.parse()?;
        let observers = payload
            .observers
            .iter()
            .map(|name| state.network.node(name).map(|node| node.identity().clone()))
            .collect::<Result<Vec<PartyId>>>()?;
        node.flows()
            .broadcast_transaction(&tx_id, &observers)
            .await
            .map(|()| tx_id)
    }
    .await;
    match result {
        Ok(id) => id.to_string().into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MessagesQuery>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let result = async {
        let node = acting_node(&state, &headers)?;
        let status = match query.status.as_deref().map(str::trim) {
            None | Some("") | Some("all") => None,
            Some(value) => Some(value.parse::<EntryStatus>()?),
        };
        node.entries(status).await
    }
    .await;
    match result {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let result = async {
        let node = acting_node(&state, &headers)?;
        let tx_id: TransitionId = id.parse()?;
        node.ledger().load_transition(&tx_id).await
    }
    .await;
    match result {
        Ok(finalized) => Json(finalized).into_response(),
        Err(err) => error_response(err),
    }
}

async fn events(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }
    let mut receiver = match acting_node(&state, &headers) {
        Ok(node) => node.subscribe(),
        Err(err) => return error_response(err),
    };

    let body = Body::from_stream(async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(finalized) => {
                    let payload = serde_json::to_string(&finalized).unwrap_or_default();
                    let line = format!("data: {}\n\n", payload);
                    yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(line));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    continue;
                }
                Err(_) => break,
            }
        }
    });

    (
        StatusCode::OK,
        [
            ("content-type", "text/event-stream"),
            ("cache-control", "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// The node named by `x-party`, or the daemon's local party.
fn acting_node<'a>(state: &'a AppState, headers: &HeaderMap) -> Result<&'a LedgerNode> {
    match headers
        .get("x-party")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
    {
        Some(name) => state.network.node(name),
        None => state.network.local(),
    }
}

fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::UnknownParty(_)
        | LedgerError::MalformedTransition(_)
        | LedgerError::ValidationRejected(_) => StatusCode::BAD_REQUEST,
        LedgerError::CounterpartyRejected(_) | LedgerError::ConsensusRejected(_) => {
            StatusCode::CONFLICT
        }
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        LedgerError::PeerUnreachable(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: LedgerError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!("request failed: {err}");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.reason().to_string(),
            kind: err.kind(),
        }),
    )
        .into_response()
}

fn authorize(
    headers: &HeaderMap,
    token: &str,
) -> std::result::Result<(), (StatusCode, Json<ErrorResponse>)> {
    if token.trim().is_empty() {
        return Ok(());
    }
    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let bearer = header.strip_prefix("Bearer ").unwrap_or("");

    if bearer == token || api_key == token {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Unauthorized".to_string(),
                kind: "unauthorized",
            }),
        ))
    }
}

pub async fn run(config: Config, host: &str, port: u16, token: &str) -> Result<()> {
    run_with_shutdown(config, host, port, token, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(
    config: Config,
    host: &str,
    port: u16,
    token: &str,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let network = Arc::new(LocalNetwork::from_config(&config)?);
    info!(
        "Hosting {} parties, acting as {}",
        network.parties().len(),
        config.local_party
    );
    let state = AppState {
        network,
        token: token.to_string(),
    };
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| LedgerError::Runtime(e.to_string()))?;
    info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| LedgerError::Runtime(e.to_string()))?;

    Ok(())
}
