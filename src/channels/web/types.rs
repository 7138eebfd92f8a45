//! Request and response DTOs for the conversation relay API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::{FileStoreError, StoreError};
use crate::legal::case::{ConversationTurn, Drained, PendingCounts};
use crate::legal::files::StoredFile;

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub channel: &'static str,
    pub uptime_secs: u64,
}

// --- Conversation ---

/// Body of `POST /api/conversation`.
///
/// Fields are left untyped so that shape errors surface as a descriptive
/// 400 rather than a generic deserialization rejection. Only a JSON object
/// deserializes; arrays are not read positionally.
#[derive(Debug, Default, Deserialize)]
#[serde(from = "JsonObject")]
pub struct AppendConversationRequest {
    pub case_id: Option<serde_json::Value>,
    pub messages: Option<serde_json::Value>,
}

type JsonObject = serde_json::Map<String, serde_json::Value>;

impl From<JsonObject> for AppendConversationRequest {
    fn from(mut fields: JsonObject) -> Self {
        Self {
            case_id: fields.remove("case_id"),
            messages: fields.remove("messages"),
        }
    }
}

/// Validated append: every element carried a string `role` and `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAppend {
    pub case_id: String,
    pub messages: Vec<ConversationTurn>,
}

pub const APPEND_SHAPE_ERROR: &str = "Expected { case_id: string, messages: [{ role, text }] }";
pub const MESSAGE_SHAPE_ERROR: &str = "Each message must have role and text";

impl AppendConversationRequest {
    /// Check the payload shape. `case_id` grammar is checked by the caller.
    pub fn validate(self) -> Result<ValidatedAppend, ApiError> {
        let case_id = match self.case_id {
            Some(serde_json::Value::String(id)) if !id.is_empty() => id,
            _ => return Err(ApiError::BadRequest(APPEND_SHAPE_ERROR.to_string())),
        };
        let items = match self.messages {
            Some(serde_json::Value::Array(items)) if !items.is_empty() => items,
            _ => return Err(ApiError::BadRequest(APPEND_SHAPE_ERROR.to_string())),
        };
        let messages = items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::Object(mut fields) => {
                    match (fields.remove("role"), fields.remove("text")) {
                        (
                            Some(serde_json::Value::String(role)),
                            Some(serde_json::Value::String(text)),
                        ) => Some(ConversationTurn { role, text }),
                        _ => None,
                    }
                }
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ApiError::BadRequest(MESSAGE_SHAPE_ERROR.to_string()))?;
        Ok(ValidatedAppend { case_id, messages })
    }
}

#[derive(Debug, Serialize)]
pub struct AppendConversationResponse {
    pub ok: bool,
    pub case_id: String,
    #[serde(rename = "defenseCount")]
    pub defense_count: usize,
    #[serde(rename = "prosecutorCount")]
    pub prosecutor_count: usize,
}

impl AppendConversationResponse {
    pub fn new(case_id: String, counts: PendingCounts) -> Self {
        Self {
            ok: true,
            case_id,
            defense_count: counts.defense,
            prosecutor_count: counts.prosecutor,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationUpdatesQuery {
    pub case_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationUpdatesResponse {
    pub case_id: String,
    pub thread_id: u64,
    pub defense: String,
    pub prosecutor: String,
}

impl From<Drained> for ConversationUpdatesResponse {
    fn from(drained: Drained) -> Self {
        Self {
            case_id: drained.case_id.to_string(),
            thread_id: drained.thread_id,
            defense: drained.defense,
            prosecutor: drained.prosecutor,
        }
    }
}

/// Body of `POST /api/conversation/clear`; anything unusable is a no-op.
#[derive(Debug, Default, Deserialize)]
#[serde(from = "JsonObject")]
pub struct ClearConversationRequest {
    pub case_id: Option<serde_json::Value>,
}

impl From<JsonObject> for ClearConversationRequest {
    fn from(mut fields: JsonObject) -> Self {
        Self {
            case_id: fields.remove("case_id"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

// --- Files ---

#[derive(Debug, Serialize)]
pub struct UploadedFileInfo {
    pub name: String,
    pub size: usize,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub path: String,
    #[serde(rename = "storedName")]
    pub stored_name: String,
}

impl From<StoredFile> for UploadedFileInfo {
    fn from(file: StoredFile) -> Self {
        Self {
            path: file.original_name.clone(),
            name: file.original_name,
            size: file.size,
            mime_type: file.mime_type,
            stored_name: file.stored_name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FileUploadResponse {
    pub files: Vec<UploadedFileInfo>,
}

// --- Errors ---

/// Request-scoped failure rendered as `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(msg)
            | Self::NotFound(msg)
            | Self::PayloadTooLarge(msg)
            | Self::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "error": self.message(),
        }));
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        // Both variants ask the caller to name a case first.
        Self::BadRequest(err.to_string())
    }
}

impl From<FileStoreError> for ApiError {
    fn from(err: FileStoreError) -> Self {
        match err {
            FileStoreError::InvalidCaseId | FileStoreError::InvalidPath => {
                Self::BadRequest(err.to_string())
            }
            FileStoreError::NotFound => Self::NotFound(err.to_string()),
            FileStoreError::Io { .. } => {
                tracing::error!("File store failure: {}", err);
                Self::Internal("Failed to access case files".to_string())
            }
        }
    }
}
