//! HTTP/JSON endpoints for peers and clients.
//!
//! | Route          | Purpose                              |
//! |----------------|--------------------------------------|
//! | `POST /vote`   | RequestVote from a candidate         |
//! | `POST /append` | AppendEntries / heartbeat from leader |
//! | `GET /get`     | local read, `?key=`                  |
//! | `POST /set`    | replicated write (leader only)       |
//! | `POST /delete` | replicated delete (leader only)      |
//! | `GET /status`  | role, term and log bookkeeping       |
//!
//! Malformed JSON bodies are answered with 400 and never reach the node.

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::NodeError;
use crate::message::{AppendRequest, AppendResponse, NodeStatus, VoteRequest, VoteResponse};
use crate::node::ConsensusNode;

type SharedNode = Arc<ConsensusNode>;

/// Errors surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("key parameter needed")]
    MissingKey,

    #[error("key not found")]
    KeyNotFound,

    #[error("not a leader")]
    NotLeader { leader: Option<String> },

    #[error("entry {index} not committed in time")]
    CommitTimeout { index: u64 },
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::MissingKey | ApiError::NotLeader { .. } => {
                StatusCode::BAD_REQUEST
            }
            ApiError::KeyNotFound => StatusCode::NOT_FOUND,
            ApiError::CommitTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<NodeError> for ApiError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::NotLeader { leader } => ApiError::NotLeader { leader },
            NodeError::CommitTimeout { index } => ApiError::CommitTimeout { index },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub leader: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let leader = match &self {
            ApiError::NotLeader { leader } => leader.clone(),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            leader,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteAck {
    pub status: String,
    pub index: u64,
}

impl WriteAck {
    fn success(index: u64) -> Self {
        Self {
            status: "success".to_string(),
            index,
        }
    }
}

/// Builds the router serving `node`.
pub fn router(node: SharedNode) -> Router {
    Router::new()
        .route("/vote", post(handle_vote))
        .route("/append", post(handle_append))
        .route("/get", get(handle_get))
        .route("/set", post(handle_set))
        .route("/delete", post(handle_delete))
        .route("/status", get(handle_status))
        .with_state(node)
        .layer(TraceLayer::new_for_http())
}

/// Serves `node` on `listener` until `shutdown` resolves.
pub async fn serve_until<F>(listener: TcpListener, node: SharedNode, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(node))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle_vote(
    State(node): State<SharedNode>,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<VoteResponse>, ApiError> {
    let Json(request) = body?;
    Ok(Json(node.request_vote(&request).await))
}

async fn handle_append(
    State(node): State<SharedNode>,
    body: Result<Json<AppendRequest>, JsonRejection>,
) -> Result<Json<AppendResponse>, ApiError> {
    let Json(request) = body?;
    Ok(Json(node.append_entries(&request).await))
}

async fn handle_get(
    State(node): State<SharedNode>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<KeyValue>, ApiError> {
    let key = query
        .key
        .filter(|key| !key.is_empty())
        .ok_or(ApiError::MissingKey)?;
    let value = node.get(&key).ok_or(ApiError::KeyNotFound)?;
    Ok(Json(KeyValue { key, value }))
}

async fn handle_set(
    State(node): State<SharedNode>,
    body: Result<Json<KeyValue>, JsonRejection>,
) -> Result<Json<WriteAck>, ApiError> {
    let Json(KeyValue { key, value }) = body?;
    debug!(key = %key, "client write");
    let index = node.set(key, value).await?;
    Ok(Json(WriteAck::success(index)))
}

async fn handle_delete(
    State(node): State<SharedNode>,
    body: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<WriteAck>, ApiError> {
    let Json(DeleteRequest { key }) = body?;
    debug!(key = %key, "client delete");
    let index = node.delete(key).await?;
    Ok(Json(WriteAck::success(index)))
}

async fn handle_status(State(node): State<SharedNode>) -> Json<NodeStatus> {
    Json(node.status().await)
}
