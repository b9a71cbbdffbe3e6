//! HTTP 入口
//!
//! - `POST /send`：校验后入队，立即返回队列深度；通道未就绪时拒绝且不入队
//! - `GET /status`：通道会话状态
//! - `GET /health`：存活文本（运行时长、队列深度）

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::DispatchError;
use crate::dispatch::{Job, JobQueue, MediaItem, MediaPayload};
use crate::transport::{SessionState, Transport};

/// 入口共享状态
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub transport: Arc<dyn Transport>,
    /// 会话查询上限；超时按未就绪处理
    pub probe_timeout: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(queue: Arc<JobQueue>, transport: Arc<dyn Transport>, probe_timeout: Duration) -> Self {
        Self {
            queue,
            transport,
            probe_timeout,
            started_at: Instant::now(),
        }
    }

    async fn session(&self) -> Result<SessionState, DispatchError> {
        match tokio::time::timeout(self.probe_timeout, self.transport.session_state()).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::TransportUnavailable(format!(
                "session query timed out after {:?}",
                self.probe_timeout
            ))),
        }
    }
}

/// 派发请求体
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub log_id: i64,
    pub recipient_handle: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_items: Vec<MediaItemRequest>,
    #[serde(default)]
    pub mute_flag: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemRequest {
    /// 缺省时取 data URL 中的 MIME
    #[serde(default)]
    pub mime_type: String,
    pub payload: String,
}

impl SendRequest {
    fn into_job(self) -> Job {
        let mut job = Job::new(self.log_id, self.recipient_handle.trim()).with_mute(self.mute_flag);
        if let Some(text) = self.text {
            job = job.with_text(text);
        }
        for item in self.media_items {
            job = job.with_media(MediaItem::new(item.mime_type, MediaPayload::parse(&item.payload)));
        }
        job
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResponse {
    fn rejected(status: StatusCode, error: impl Into<String>) -> Response {
        (
            status,
            Json(SendResponse {
                accepted: false,
                queue_depth: None,
                error: Some(error.into()),
            }),
        )
            .into_response()
    }
}

/// 创建路由
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/send", post(enqueue))
        .route("/status", get(status))
        .route("/health", get(health))
        .with_state(state)
}

/// POST /send - 入队派发任务
async fn enqueue(State(state): State<Arc<AppState>>, Json(req): Json<SendRequest>) -> Response {
    if req.recipient_handle.trim().is_empty() {
        return SendResponse::rejected(StatusCode::BAD_REQUEST, "recipientHandle is required");
    }

    match state.session().await {
        Ok(session) if session.ready => {}
        Ok(_) => {
            tracing::warn!(log_id = req.log_id, "Rejecting job, transport session not ready");
            return SendResponse::rejected(
                StatusCode::SERVICE_UNAVAILABLE,
                DispatchError::TransportUnavailable("session not ready".to_string()).to_string(),
            );
        }
        Err(e) => {
            tracing::warn!(log_id = req.log_id, error = %e, "Rejecting job, transport unreachable");
            return SendResponse::rejected(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
        }
    }

    let log_id = req.log_id;
    let depth = state.queue.enqueue(req.into_job());
    tracing::info!(log_id, queue_depth = depth, "Job enqueued");

    (
        StatusCode::ACCEPTED,
        Json(SendResponse {
            accepted: true,
            queue_depth: Some(depth),
            error: None,
        }),
    )
        .into_response()
}

/// GET /status - 会话状态；查询失败视为未就绪
async fn status(State(state): State<Arc<AppState>>) -> Json<SessionState> {
    let session = state.session().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Session state unavailable");
        SessionState::default()
    });
    Json(session)
}

/// GET /health - 存活检查
async fn health(State(state): State<Arc<AppState>>) -> String {
    format!(
        "ok uptime={}s queue_depth={}",
        state.started_at.elapsed().as_secs(),
        state.queue.depth()
    )
}
