//! Control-plane HTTP server.
//!
//! A thin translator from the simulator-facing HTTP surface into controller
//! calls. Bodies are JSON except for node launches, which are multipart: a
//! `config` text part plus one file part per file to mount.

use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::controller::{
    ClientDef, ClientLaunchConfig, Controller, ControllerError, NodeHandle, SuiteId, TestId,
};
use crate::results::{SummaryResult, Writer};

/// Uploads larger than this are rejected.
const MAX_UPLOAD_BYTES: usize = 128 << 20;

#[derive(Clone)]
pub struct ApiState {
    pub controller: Arc<Controller>,
    pub writer: Writer,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Controller(err) => match err {
                ControllerError::SuiteNotFound
                | ControllerError::TestNotFound
                | ControllerError::UnknownClient => StatusCode::NOT_FOUND,
                ControllerError::Runtime(_) | ControllerError::Io(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        };
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TestRequest {
    name: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ExecRequest {
    command: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ExecResponse {
    #[serde(rename = "exitCode")]
    exit_code: i32,
    stdout: String,
    stderr: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/clients",
            get(list_clients).fallback(method_not_allowed),
        )
        .route("/testsuite", post(create_suite).fallback(method_not_allowed))
        .route(
            "/testsuite/:suite",
            delete(end_suite).fallback(method_not_allowed),
        )
        .route(
            "/testsuite/:suite/test",
            post(create_test).fallback(method_not_allowed),
        )
        .route(
            "/testsuite/:suite/test/:test",
            post(end_test).fallback(method_not_allowed),
        )
        .route(
            "/testsuite/:suite/test/:test/node",
            post(launch_node).fallback(method_not_allowed),
        )
        .route(
            "/testsuite/:suite/test/:test/node/:node",
            get(node_info).delete(remove_node).fallback(method_not_allowed),
        )
        .route(
            "/testsuite/:suite/test/:test/node/:node/exec",
            post(exec).fallback(method_not_allowed),
        )
        .route(
            "/testsuite/:suite/network/:name",
            post(create_network)
                .delete(remove_network)
                .fallback(method_not_allowed),
        )
        .route(
            "/testsuite/:suite/network/:name/:node",
            post(connect_network)
                .delete(disconnect_network)
                .get(network_ip)
                .fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// A running control-plane server bound to a concrete address.
pub struct ApiServer {
    pub addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
}

/// Binds the server and serves it on a background task until
/// [`ApiServer::shutdown`] is called.
pub fn start(state: ApiState, addr: SocketAddr) -> Result<ApiServer, ServeError> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let server = hyper::Server::from_tcp(listener)?.serve(router(state).into_make_service());
    let addr = server.local_addr();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let graceful = server.with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    let handle = tokio::spawn(async move {
        if let Err(err) = graceful.await {
            warn!(%err, "api server error");
        }
    });
    debug!(%addr, "control-plane api listening");
    Ok(ApiServer {
        addr,
        shutdown_tx,
        handle,
    })
}

impl ApiServer {
    /// Gracefully drains in-flight requests and stops the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

fn parse_suite(raw: &str) -> Result<SuiteId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("invalid suite id".to_string()))
}

fn parse_test(raw: &str) -> Result<TestId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest("invalid test id".to_string()))
}

fn decode<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|_| ApiError::BadRequest("invalid json".to_string()))
}

async fn list_clients(State(state): State<ApiState>) -> Json<Vec<ClientDef>> {
    Json(state.controller.list_clients())
}

async fn create_suite(
    State(state): State<ApiState>,
    body: Result<Json<TestRequest>, JsonRejection>,
) -> Result<Json<SuiteId>, ApiError> {
    let req = decode(body)?;
    Ok(Json(state.controller.create_suite(&req.name, &req.description)))
}

async fn end_suite(
    State(state): State<ApiState>,
    Path(suite): Path<String>,
) -> Result<Json<&'static str>, ApiError> {
    let suite = parse_suite(&suite)?;
    state.controller.end_suite(suite)?;
    Ok(Json("ok"))
}

async fn create_test(
    State(state): State<ApiState>,
    Path(suite): Path<String>,
    body: Result<Json<TestRequest>, JsonRejection>,
) -> Result<Json<TestId>, ApiError> {
    let suite = parse_suite(&suite)?;
    let req = decode(body)?;
    let id = state
        .controller
        .create_test(suite, &req.name, &req.description)?;
    Ok(Json(id))
}

async fn end_test(
    State(state): State<ApiState>,
    Path((suite, test)): Path<(String, String)>,
    body: Result<Json<SummaryResult>, JsonRejection>,
) -> Result<Json<&'static str>, ApiError> {
    let suite = parse_suite(&suite)?;
    let test = parse_test(&test)?;
    let verdict = decode(body)?;
    state.controller.end_test(suite, test, verdict).await?;
    if let Err(err) = state.controller.save_results(&state.writer) {
        warn!(%err, "results write error");
    }
    Ok(Json("ok"))
}

async fn launch_node(
    State(state): State<ApiState>,
    Path((suite, test)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<Json<NodeHandle>, ApiError> {
    let suite = parse_suite(&suite)?;
    let test = parse_test(&test)?;

    let mut config: Option<ClientLaunchConfig> = None;
    let mut files: HashMap<String, PathBuf> = HashMap::new();
    let mut uploads: Vec<NamedTempFile> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?
    {
        let name = match field.name() {
            Some(name) => name.to_owned(),
            None => continue,
        };
        if name == "config" {
            let raw = field
                .text()
                .await
                .map_err(|err| ApiError::BadRequest(err.to_string()))?;
            config = Some(
                serde_json::from_str(&raw)
                    .map_err(|_| ApiError::BadRequest("invalid json".to_string()))?,
            );
        } else {
            let data = field
                .bytes()
                .await
                .map_err(|err| ApiError::BadRequest(err.to_string()))?;
            let mut upload =
                NamedTempFile::new().map_err(|err| ApiError::Internal(err.to_string()))?;
            upload
                .write_all(&data)
                .map_err(|err| ApiError::Internal(err.to_string()))?;
            // Duplicate form keys: last one wins.
            files.insert(name, upload.path().to_path_buf());
            uploads.push(upload);
        }
    }
    let config = config.ok_or_else(|| ApiError::BadRequest("missing config".to_string()))?;

    let handle = state
        .controller
        .launch_node(suite, test, config, &files)
        .await?;
    drop(uploads);
    Ok(Json(handle))
}

async fn node_info(
    State(state): State<ApiState>,
    Path((suite, test, node)): Path<(String, String, String)>,
) -> Result<Json<HashMap<String, String>>, ApiError> {
    parse_suite(&suite)?;
    parse_test(&test)?;
    Ok(Json(state.controller.node_info(&node)))
}

async fn remove_node(
    State(state): State<ApiState>,
    Path((suite, test, node)): Path<(String, String, String)>,
) -> Result<Json<&'static str>, ApiError> {
    parse_suite(&suite)?;
    parse_test(&test)?;
    state.controller.remove_node(&node).await?;
    Ok(Json("ok"))
}

async fn exec(
    State(state): State<ApiState>,
    Path((suite, test, node)): Path<(String, String, String)>,
    body: Result<Json<ExecRequest>, JsonRejection>,
) -> Result<Json<ExecResponse>, ApiError> {
    parse_suite(&suite)?;
    parse_test(&test)?;
    let req = decode(body)?;
    let out = state.controller.exec(&node, &req.command).await?;
    Ok(Json(ExecResponse {
        exit_code: out.exit_code,
        stdout: out.stdout,
        stderr: out.stderr,
    }))
}

async fn create_network(
    State(state): State<ApiState>,
    Path((suite, name)): Path<(String, String)>,
) -> Result<Json<&'static str>, ApiError> {
    parse_suite(&suite)?;
    state.controller.create_network(&name).await?;
    Ok(Json("ok"))
}

async fn remove_network(
    State(state): State<ApiState>,
    Path((suite, name)): Path<(String, String)>,
) -> Result<Json<&'static str>, ApiError> {
    parse_suite(&suite)?;
    state.controller.remove_network(&name).await?;
    Ok(Json("ok"))
}

async fn connect_network(
    State(state): State<ApiState>,
    Path((suite, name, node)): Path<(String, String, String)>,
) -> Result<Json<&'static str>, ApiError> {
    parse_suite(&suite)?;
    state.controller.connect_network(&name, &node).await?;
    Ok(Json("ok"))
}

async fn disconnect_network(
    State(state): State<ApiState>,
    Path((suite, name, node)): Path<(String, String, String)>,
) -> Result<Json<&'static str>, ApiError> {
    parse_suite(&suite)?;
    state.controller.disconnect_network(&name, &node).await?;
    Ok(Json("ok"))
}

async fn network_ip(
    State(state): State<ApiState>,
    Path((suite, name, node)): Path<(String, String, String)>,
) -> Result<Json<String>, ApiError> {
    parse_suite(&suite)?;
    let ip = state.controller.network_ip(&name, &node).await?;
    Ok(Json(ip))
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorResponse {
            error: "method not allowed".to_string(),
        }),
    )
        .into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "not found".to_string(),
        }),
    )
        .into_response()
}
