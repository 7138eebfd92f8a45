//! Axum HTTP server for the conversation relay.
//!
//! Handles the conversation buffer routes, case file upload/preview, and
//! health.

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, Query, State,
        multipart::{Field, MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::BytesMut;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::channels::web::types::*;
use crate::db::CaseStore;
use crate::error::{ChannelError, FileStoreError};
use crate::legal::case::CaseId;
use crate::legal::files::{FileStore, PendingUpload};
use crate::lifecycle::{self, StopReason};

/// Maximum JSON request body for the conversation routes (1 MiB).
const JSON_BODY_LIMIT: usize = 1024 * 1024;
/// Room for multipart boundaries and the `caseId` field on top of file bytes.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Shared state for all gateway handlers.
pub struct GatewayState {
    /// Conversation buffers per case.
    pub cases: Arc<dyn CaseStore>,
    /// Uploaded case documents.
    pub files: FileStore,
    /// Maximum number of files in one upload request.
    pub max_upload_files: usize,
    /// Maximum size of one uploaded file in bytes.
    pub max_upload_file_bytes: usize,
    /// Server startup time for uptime calculation.
    pub startup_time: std::time::Instant,
}

impl GatewayState {
    pub fn new(cases: Arc<dyn CaseStore>, files: FileStore) -> Self {
        Self {
            cases,
            files,
            max_upload_files: crate::legal::files::MAX_UPLOAD_FILES,
            max_upload_file_bytes: crate::legal::files::MAX_UPLOAD_FILE_BYTES,
            startup_time: std::time::Instant::now(),
        }
    }

    pub fn with_upload_limits(mut self, max_files: usize, max_file_bytes: usize) -> Self {
        self.max_upload_files = max_files;
        self.max_upload_file_bytes = max_file_bytes;
        self
    }

    fn upload_body_limit(&self) -> usize {
        self.max_upload_files
            .saturating_mul(self.max_upload_file_bytes)
            .saturating_add(MULTIPART_OVERHEAD)
    }
}

/// Build the relay router with all middleware applied.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let upload_limit = state.upload_body_limit();

    let conversation = Router::new()
        .route("/api/conversation", post(conversation_append_handler))
        .route("/api/conversation/updates", get(conversation_updates_handler))
        .route("/api/conversation/clear", post(conversation_clear_handler))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT));

    let files = Router::new()
        .route(
            "/api/files/upload",
            post(files_upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/files/{case_id}/{stored_name}", get(files_get_handler))
        // Preview URL shape used by the document viewer.
        .route(
            "/api/cases/{case_id}/files/{stored_name}",
            get(files_get_handler),
        );

    let routes = Router::new()
        .route("/api/health", get(health_handler))
        .merge(conversation)
        .merge(files);

    with_middleware(routes).with_state(state)
}

fn with_middleware(routes: Router<Arc<GatewayState>>) -> Router<Arc<GatewayState>> {
    // The browser client and the voice backend run on other origins.
    let cors = CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers(cors::Any);

    routes.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(cors)
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            )),
    )
}

/// A running gateway: its bound address and the serve task.
pub struct GatewayHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl GatewayHandle {
    /// Actual bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            tracing::error!("Gateway task failed to join: {}", e);
            lifecycle::record_fault();
        }
    }

    /// Serve until `signal` resolves (then shut down gracefully) or the
    /// server stops on its own.
    pub async fn serve_until<F>(mut self, signal: F) -> StopReason
    where
        F: Future<Output = ()>,
    {
        let signalled = tokio::select! {
            _ = signal => true,
            joined = &mut self.task => {
                if let Err(e) = joined {
                    tracing::error!("Gateway task failed: {}", e);
                    lifecycle::record_fault();
                }
                false
            }
        };
        if signalled {
            self.shutdown().await;
            StopReason::Signal
        } else {
            StopReason::ServerExited
        }
    }
}

/// Start the gateway HTTP server.
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<GatewayState>,
) -> Result<GatewayHandle, ChannelError> {
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        ChannelError::StartupFailed {
            name: "conversation".to_string(),
            reason: format!("Failed to bind to {}: {}", addr, e),
        }
    })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ChannelError::StartupFailed {
            name: "conversation".to_string(),
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let app = build_router(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Conversation API shutting down");
            })
            .await
        {
            tracing::error!("Conversation API server error: {}", e);
            lifecycle::record_fault();
        }
    });

    tracing::info!("Conversation API listening on http://{}", bound_addr);
    Ok(GatewayHandle {
        addr: bound_addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = lifecycle::panic_message(payload.as_ref());
    tracing::error!("Request handler panicked: {}", detail);
    lifecycle::record_fault();
    ApiError::Internal("Internal server error".to_string()).into_response()
}

// --- Health ---

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        channel: "conversation",
        uptime_secs: state.startup_time.elapsed().as_secs(),
    })
}

// --- Conversation handlers ---

fn parse_case_id(raw: &str) -> Result<CaseId, ApiError> {
    CaseId::parse(raw).ok_or_else(|| {
        ApiError::BadRequest(
            "Invalid case_id: only letters, digits and '-' are allowed".to_string(),
        )
    })
}

async fn conversation_append_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<AppendConversationRequest>, JsonRejection>,
) -> Result<Json<AppendConversationResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        tracing::debug!("Rejected conversation body: {}", rejection.body_text());
        ApiError::BadRequest(APPEND_SHAPE_ERROR.to_string())
    })?;
    let validated = request.validate()?;
    let case_id = parse_case_id(&validated.case_id)?;

    let counts = state.cases.append(&case_id, &validated.messages).await?;
    Ok(Json(AppendConversationResponse::new(
        case_id.to_string(),
        counts,
    )))
}

async fn conversation_updates_handler(
    State(state): State<Arc<GatewayState>>,
    query: Result<Query<ConversationUpdatesQuery>, QueryRejection>,
) -> Result<Json<ConversationUpdatesResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let requested = match query.case_id.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(parse_case_id(raw)?),
    };

    let drained = state.cases.drain(requested.as_ref()).await?;
    Ok(Json(drained.into()))
}

async fn conversation_clear_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<ClearConversationRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let case_id = body
        .ok()
        .and_then(|Json(request)| request.case_id)
        .and_then(|value| value.as_str().and_then(CaseId::parse));

    match case_id {
        Some(case_id) => state.cases.clear(&case_id).await?,
        None => tracing::debug!("Ignoring clear request without a usable case_id"),
    }
    Ok(Json(OkResponse { ok: true }))
}

// --- File handlers ---

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(format!("Multipart read error: {}", err.body_text()))
    }
}

/// Read one file part, refusing to buffer more than `limit` bytes.
async fn read_file_field(mut field: Field<'_>, limit: usize) -> Result<PendingUpload, ApiError> {
    let field_name = field.name().unwrap_or_default().to_string();
    let file_name = field.file_name().map(str::to_string);
    let content_type = field.content_type().map(str::to_string);

    let mut data = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if data.len() + chunk.len() > limit {
            return Err(ApiError::PayloadTooLarge(format!(
                "File '{}' exceeds the {} byte upload limit",
                file_name.as_deref().unwrap_or(&field_name),
                limit
            )));
        }
        data.extend_from_slice(&chunk);
    }

    Ok(PendingUpload {
        field_name,
        file_name,
        content_type,
        data: data.freeze(),
    })
}

async fn files_upload_handler(
    State(state): State<Arc<GatewayState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<FileUploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    // Everything is buffered before validation so that a bad caseId never
    // reaches the disk, whatever the field order. After the first rejected
    // part the remaining parts are skipped, except `caseId`, whose error
    // takes precedence.
    let mut raw_case_id: Option<String> = None;
    let mut uploads: Vec<PendingUpload> = Vec::new();
    let mut rejected: Option<ApiError> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "caseId" => {
                raw_case_id = Some(field.text().await.map_err(multipart_error)?);
            }
            _ if rejected.is_some() => {}
            "files" if uploads.len() >= state.max_upload_files => {
                rejected = Some(ApiError::BadRequest(format!(
                    "Too many files: at most {} per upload",
                    state.max_upload_files
                )));
            }
            "files" => match read_file_field(field, state.max_upload_file_bytes).await {
                Ok(upload) => uploads.push(upload),
                Err(err) => rejected = Some(err),
            },
            other => {
                rejected = Some(ApiError::BadRequest(format!("Unexpected field '{other}'")));
            }
        }
    }

    let case_id = raw_case_id
        .as_deref()
        .and_then(CaseId::parse)
        .ok_or(FileStoreError::InvalidCaseId)?;
    if let Some(err) = rejected {
        tracing::warn!(case_id = %case_id, "Rejected upload: {}", err.message());
        return Err(err);
    }

    let stored = state.files.store_all(&case_id, uploads).await?;
    Ok(Json(FileUploadResponse {
        files: stored.into_iter().map(UploadedFileInfo::from).collect(),
    }))
}

async fn files_get_handler(
    State(state): State<Arc<GatewayState>>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path((case_id, stored_name)) =
        path.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let case_id = CaseId::parse(&case_id)
        .filter(|_| !stored_name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Invalid caseId or storedName".to_string()))?;

    let file = state.files.read(&case_id, &stored_name).await?;
    let disposition = HeaderValue::from_str(&format!("inline; filename=\"{}\"", file.stored_name))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(file.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.data,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::db::InMemoryCaseStore;
    use crate::legal::case::ConversationTurn;

    const BOUNDARY: &str = "relay-test-boundary";

    fn test_state() -> (TempDir, Arc<InMemoryCaseStore>, Arc<GatewayState>) {
        let tmp = TempDir::new().expect("tempdir");
        let files = FileStore::open(tmp.path().join("uploads")).expect("file store");
        let cases = Arc::new(InMemoryCaseStore::new());
        let state = Arc::new(GatewayState::new(cases.clone(), files));
        (tmp, cases, state)
    }

    fn append_request(value: Value) -> Result<Json<AppendConversationRequest>, JsonRejection> {
        Ok(Json(serde_json::from_value(value).expect("request deserializes")))
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
        let response = router.oneshot(request).await.expect("router responds");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes()
            .to_vec();
        (status, body, headers)
    }

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a [u8]),
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File(name, file_name, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(parts: &[Part<'_>]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/files/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .expect("request builds")
    }

    #[tokio::test]
    async fn append_then_updates_delivers_scenario() {
        let (_tmp, cases, state) = test_state();

        let Json(appended) = conversation_append_handler(
            State(state.clone()),
            append_request(json!({
                "case_id": "abc-1",
                "messages": [
                    {"role": "user", "text": "Objection"},
                    {"role": "agent", "text": "Overruled"},
                ],
            })),
        )
        .await
        .expect("append succeeds");
        assert!(appended.ok);
        assert_eq!(appended.defense_count, 1);
        assert_eq!(appended.prosecutor_count, 1);

        let Json(update) = conversation_updates_handler(
            State(state.clone()),
            Ok(Query(ConversationUpdatesQuery {
                case_id: Some("abc-1".to_string()),
            })),
        )
        .await
        .expect("drain succeeds");
        assert_eq!(update.case_id, "abc-1");
        assert_eq!(update.thread_id, 0);
        assert_eq!(update.defense, "Objection");
        assert_eq!(update.prosecutor, "Overruled");

        let record = cases
            .snapshot(&CaseId::parse("abc-1").unwrap())
            .expect("case exists");
        assert!(record.defense_buffer.is_empty());
        assert!(record.prosecutor_buffer.is_empty());
        assert_eq!(record.thread_id, 1);
    }

    #[tokio::test]
    async fn append_with_empty_messages_creates_nothing() {
        let (_tmp, cases, state) = test_state();
        let err = conversation_append_handler(
            State(state),
            append_request(json!({"case_id": "fresh-case", "messages": []})),
        )
        .await
        .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("messages: [{ role, text }]"));
        assert!(cases.is_empty());
        assert_eq!(cases.active_case(), None);
    }

    #[tokio::test]
    async fn append_rejects_malformed_case_id_without_mutation() {
        let (_tmp, cases, state) = test_state();
        for bad in ["../x", "a b", "case_1"] {
            let err = conversation_append_handler(
                State(state.clone()),
                append_request(json!({
                    "case_id": bad,
                    "messages": [{"role": "user", "text": "hi"}],
                })),
            )
            .await
            .unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
        assert!(cases.is_empty());
    }

    #[tokio::test]
    async fn append_rejects_partially_malformed_batch() {
        let (_tmp, cases, state) = test_state();
        let err = conversation_append_handler(
            State(state),
            append_request(json!({
                "case_id": "abc-1",
                "messages": [{"role": "user", "text": "ok"}, {"role": "agent"}],
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err, ApiError::BadRequest(MESSAGE_SHAPE_ERROR.to_string()));
        assert!(cases.is_empty());
    }

    #[tokio::test]
    async fn updates_falls_back_to_active_case() {
        let (_tmp, _cases, state) = test_state();
        conversation_append_handler(
            State(state.clone()),
            append_request(json!({
                "case_id": "active-1",
                "messages": [{"role": "assistant", "text": "Call your first witness"}],
            })),
        )
        .await
        .unwrap();

        for query in [None, Some(String::new())] {
            let Json(update) = conversation_updates_handler(
                State(state.clone()),
                Ok(Query(ConversationUpdatesQuery { case_id: query })),
            )
            .await
            .expect("falls back to the active case");
            assert_eq!(update.case_id, "active-1");
        }
    }

    #[tokio::test]
    async fn updates_without_any_case_is_bad_request() {
        let (_tmp, _cases, state) = test_state();
        let err = conversation_updates_handler(
            State(state.clone()),
            Ok(Query(ConversationUpdatesQuery::default())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("No active case"), "{err:?}");

        let err = conversation_updates_handler(
            State(state),
            Ok(Query(ConversationUpdatesQuery {
                case_id: Some("unknown".to_string()),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn clear_is_always_ok() {
        let (_tmp, cases, state) = test_state();
        for body in [json!({}), json!({"case_id": 7}), json!({"case_id": "../etc"})] {
            let Json(resp) = conversation_clear_handler(
                State(state.clone()),
                Ok(Json(serde_json::from_value(body).unwrap())),
            )
            .await
            .expect("clear never fails");
            assert!(resp.ok);
        }
        assert!(cases.is_empty());

        let Json(resp) = conversation_clear_handler(
            State(state.clone()),
            Ok(Json(serde_json::from_value(json!({"case_id": "abc-1"})).unwrap())),
        )
        .await
        .unwrap();
        assert!(resp.ok);
        assert_eq!(
            cases.active_case(),
            CaseId::parse("abc-1")
        );

        // A cleared case can be polled immediately.
        let Json(update) = conversation_updates_handler(
            State(state),
            Ok(Query(ConversationUpdatesQuery::default())),
        )
        .await
        .unwrap();
        assert_eq!(update.thread_id, 0);
        assert_eq!(update.defense, "");
    }

    #[tokio::test]
    async fn router_rejects_non_json_append_with_json_error() {
        let (_tmp, _cases, state) = test_state();
        let request = Request::builder()
            .method("POST")
            .uri("/api/conversation")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("[1, 2, 3]"))
            .unwrap();
        let (status, body, _) = send(build_router(state), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], APPEND_SHAPE_ERROR);
    }

    #[tokio::test]
    async fn router_clear_accepts_empty_body() {
        let (_tmp, _cases, state) = test_state();
        let request = Request::builder()
            .method("POST")
            .uri("/api/conversation/clear")
            .body(Body::empty())
            .unwrap();
        let (status, body, _) = send(build_router(state), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn router_upload_then_preview_round_trip() {
        let (_tmp, _cases, state) = test_state();
        let router = build_router(state.clone());

        let (status, body, _) = send(
            router.clone(),
            upload_request(&[
                Part::File("files", "Exhibit 1.pdf", b"%PDF-1.7"),
                Part::Text("caseId", "abc-1"),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({"files": [{
                "name": "Exhibit 1.pdf",
                "size": 8,
                "type": "application/pdf",
                "path": "Exhibit 1.pdf",
                "storedName": "Exhibit_1.pdf",
            }]})
        );

        for uri in [
            "/api/files/abc-1/Exhibit_1.pdf",
            "/api/cases/abc-1/files/Exhibit_1.pdf",
        ] {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let (status, body, headers) = send(router.clone(), request).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, b"%PDF-1.7");
            assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
            assert_eq!(
                headers[header::CONTENT_DISPOSITION],
                "inline; filename=\"Exhibit_1.pdf\""
            );
        }
    }

    #[tokio::test]
    async fn router_upload_rejects_invalid_case_id_without_disk_io() {
        let (_tmp, _cases, state) = test_state();
        let router = build_router(state.clone());
        for case_id in ["../escape", "", "a/b"] {
            let (status, body, _) = send(
                router.clone(),
                upload_request(&[
                    Part::Text("caseId", case_id),
                    Part::File("files", "a.pdf", b"x"),
                ]),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let body: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(body["error"], "Invalid or missing caseId");
        }
        let (status, _, _) =
            send(router, upload_request(&[Part::File("files", "a.pdf", b"x")])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let entries = std::fs::read_dir(state.files.root()).unwrap().count();
        assert_eq!(entries, 0);
    }

    #[tokio::test]
    async fn router_upload_enforces_file_count_and_size() {
        let (_tmp, _cases, state) = test_state();
        let limited = Arc::new(
            GatewayState::new(state.cases.clone(), state.files.clone()).with_upload_limits(2, 4),
        );
        let router = build_router(limited);

        let (status, _, _) = send(
            router.clone(),
            upload_request(&[
                Part::Text("caseId", "abc-1"),
                Part::File("files", "a", b"1"),
                Part::File("files", "b", b"2"),
                Part::File("files", "c", b"3"),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(
            router.clone(),
            upload_request(&[
                Part::Text("caseId", "abc-1"),
                Part::File("files", "big", b"12345"),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

        let (status, body, _) = send(
            router,
            upload_request(&[
                Part::Text("caseId", "abc-1"),
                Part::File("avatar", "a.png", b"1"),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Unexpected field 'avatar'");
        assert!(!state.files.case_dir(&CaseId::parse("abc-1").unwrap()).exists());
    }

    #[tokio::test]
    async fn router_preview_guards_paths() {
        let (_tmp, _cases, state) = test_state();
        std::fs::write(state.files.root().join("outside.txt"), b"secret").unwrap();
        std::fs::create_dir_all(state.files.case_dir(&CaseId::parse("abc-1").unwrap())).unwrap();
        let router = build_router(state);

        let cases = [
            ("/api/files/abc-1/..", StatusCode::BAD_REQUEST),
            ("/api/files/abc-1/.", StatusCode::BAD_REQUEST),
            ("/api/files/abc-1/..%2Foutside.txt", StatusCode::NOT_FOUND),
            ("/api/files/abc-1/missing.pdf", StatusCode::NOT_FOUND),
            ("/api/files/bad_case/a.pdf", StatusCode::BAD_REQUEST),
        ];
        for (uri, expected) in cases {
            let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let (status, body, _) = send(router.clone(), request).await;
            assert_eq!(status, expected, "{uri}");
            assert_ne!(body, b"secret", "{uri}");
        }
    }

    #[tokio::test]
    async fn router_sets_cors_and_nosniff_headers() {
        let (_tmp, _cases, state) = test_state();
        let request = Request::builder()
            .uri("/api/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let (status, body, headers) = send(build_router(state), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[test]
    fn panic_response_is_json_500() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    async fn exploding_handler() -> &'static str {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn router_contains_handler_panics() {
        let (_tmp, _cases, state) = test_state();
        let router = with_middleware(
            Router::new()
                .route("/explode", get(exploding_handler))
                .route("/api/health", get(health_handler)),
        )
        .with_state(state);

        let request = Request::builder().uri("/explode").body(Body::empty()).unwrap();
        let (status, body, headers) = send(router.clone(), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"error": "Internal server error"}));
        assert!(lifecycle::has_faulted());

        let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
        let (status, _, _) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn router_upload_rejects_non_multipart_body_with_json_error() {
        let (_tmp, _cases, state) = test_state();
        let request = Request::builder()
            .method("POST")
            .uri("/api/files/upload")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"caseId": "abc-1"}"#))
            .unwrap();
        let (status, body, headers) = send(build_router(state), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn router_preview_rejects_undecodable_name_with_json_error() {
        let (_tmp, _cases, state) = test_state();
        let request = Request::builder()
            .uri("/api/files/abc-1/%FF%FE")
            .body(Body::empty())
            .unwrap();
        let (status, body, headers) = send(build_router(state), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn router_upload_reports_bad_case_id_before_other_part_errors() {
        let (_tmp, _cases, state) = test_state();
        let limited = Arc::new(
            GatewayState::new(state.cases.clone(), state.files.clone()).with_upload_limits(2, 4),
        );
        let router = build_router(limited);

        let requests = [
            upload_request(&[
                Part::File("files", "big.pdf", b"12345"),
                Part::Text("caseId", "no good"),
            ]),
            upload_request(&[
                Part::Text("note", "hello"),
                Part::Text("caseId", "../x"),
            ]),
            upload_request(&[Part::File("files", "big.pdf", b"12345")]),
        ];
        for request in requests {
            let (status, body, _) = send(router.clone(), request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let body: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(body["error"], "Invalid or missing caseId");
        }
        assert_eq!(std::fs::read_dir(state.files.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn router_ignores_array_bodies() {
        let (_tmp, cases, state) = test_state();
        let router = build_router(state);

        let request = Request::builder()
            .method("POST")
            .uri("/api/conversation")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"["arr-1", [{"role": "user", "text": "smuggled"}]]"#,
            ))
            .unwrap();
        let (status, body, _) = send(router.clone(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], APPEND_SHAPE_ERROR);
        assert!(cases.is_empty());

        let live = CaseId::parse("abc-1").unwrap();
        cases
            .append(&live, &[ConversationTurn {
                role: "user".to_string(),
                text: "pending".to_string(),
            }])
            .await
            .unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/api/conversation/clear")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"["abc-1"]"#))
            .unwrap();
        let (status, _, _) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cases.snapshot(&live).unwrap().defense_buffer, vec!["pending"]);
    }
}
