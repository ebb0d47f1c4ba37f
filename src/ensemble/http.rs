//! HTTP API for the ensemble server
//!
//! Every node route carries the caller's session id so ephemeral nodes can
//! be tied to it. Payloads travel base64-encoded inside JSON bodies; errors
//! come back as `{ "kind": ..., "error": ... }` with a matching status code.

use crate::common::{Error, Result};
use crate::ensemble::memory::{MemEnsemble, SessionId};
use crate::ensemble::CreateMode;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session: SessionId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRequest {
    pub session: SessionId,
    pub path: String,
    pub mode: CreateMode,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WriteRequest {
    pub session: SessionId,
    pub path: String,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PathQuery {
    pub session: SessionId,
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataResponse {
    pub data: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChildrenResponse {
    pub children: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub error: String,
}

pub fn encode_data(data: Option<&Bytes>) -> Option<String> {
    data.map(|bytes| STANDARD.encode(bytes))
}

pub fn decode_data(path: &str, data: Option<String>) -> Result<Option<Bytes>> {
    data.map(|encoded| {
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(|e| Error::InvalidRecord {
                path: path.to_string(),
                reason: format!("payload is not base64: {}", e),
            })
    })
    .transpose()
}

/// Error wrapper that renders as a JSON error body
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.to_http_status();
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "Ensemble request failed");
        }
        let body = ErrorBody {
            kind: self.0.kind().to_string(),
            error: self.0.detail(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn open_session(State(ensemble): State<MemEnsemble>) -> ApiResult<Json<SessionResponse>> {
    let session = ensemble.open_session().await?;
    Ok(Json(SessionResponse { session }))
}

async fn close_session(
    State(ensemble): State<MemEnsemble>,
    Path(session): Path<SessionId>,
) -> ApiResult<StatusCode> {
    ensemble.close_session(session).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_node(
    State(ensemble): State<MemEnsemble>,
    Json(req): Json<CreateRequest>,
) -> ApiResult<(StatusCode, Json<CreateResponse>)> {
    let data = decode_data(&req.path, req.data)?;
    let path = ensemble.create(req.session, &req.path, req.mode, data).await?;
    Ok((StatusCode::CREATED, Json(CreateResponse { path })))
}

async fn read_node(
    State(ensemble): State<MemEnsemble>,
    Query(q): Query<PathQuery>,
) -> ApiResult<Json<DataResponse>> {
    let data = ensemble.read(q.session, &q.path).await?;
    Ok(Json(DataResponse {
        data: encode_data(data.as_ref()),
    }))
}

async fn write_node(
    State(ensemble): State<MemEnsemble>,
    Json(req): Json<WriteRequest>,
) -> ApiResult<StatusCode> {
    let data = decode_data(&req.path, req.data)?;
    ensemble.write(req.session, &req.path, data).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_node(
    State(ensemble): State<MemEnsemble>,
    Query(q): Query<PathQuery>,
) -> ApiResult<StatusCode> {
    ensemble.delete(q.session, &q.path).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_children(
    State(ensemble): State<MemEnsemble>,
    Query(q): Query<PathQuery>,
) -> ApiResult<Json<ChildrenResponse>> {
    let children = ensemble.list_children(q.session, &q.path).await?;
    Ok(Json(ChildrenResponse { children }))
}

async fn exists_node(
    State(ensemble): State<MemEnsemble>,
    Query(q): Query<PathQuery>,
) -> ApiResult<Json<ExistsResponse>> {
    let exists = ensemble.exists(q.session, &q.path).await?;
    Ok(Json(ExistsResponse { exists }))
}

/// Health check with tree and session counts
async fn health(State(ensemble): State<MemEnsemble>) -> impl IntoResponse {
    Json(json!({
        "status": if ensemble.is_available() { "healthy" } else { "unavailable" },
        "nodes": ensemble.node_count().await,
        "sessions": ensemble.session_count().await,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn create_router(ensemble: MemEnsemble) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(open_session))
        .route("/sessions/:session", delete(close_session))
        .route(
            "/nodes",
            post(create_node)
                .get(read_node)
                .put(write_node)
                .delete(delete_node),
        )
        .route("/nodes/children", get(list_children))
        .route("/nodes/exists", get(exists_node))
        .layer(TraceLayer::new_for_http())
        .with_state(ensemble)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_encoding() {
        let data = Bytes::from_static(b"data");
        let encoded = encode_data(Some(&data));
        assert_eq!(decode_data("/x", encoded).unwrap(), Some(data));
        assert_eq!(decode_data("/x", None).unwrap(), None);
        assert!(matches!(
            decode_data("/x", Some("%%%".into())),
            Err(Error::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody {
            kind: Error::PathNotFound("/x".into()).kind().to_string(),
            error: "Path not found: /x".into(),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["kind"], "path_not_found");
    }
}
