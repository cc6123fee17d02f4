//! HTTP 处理函数

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::AppState;
use crate::error::ErrorKind;
use crate::models::QuizChainRequest;
use crate::orchestrator::SolveResponse;
use crate::workflow::CancelFlag;

pub const SERVICE_NAME: &str = "quiz-chain-solver";

/// GET /
pub async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "email": state.gate.config().expected_email,
        "endpoints": {
            "solve": "POST /solve",
            "health": "GET /health",
        },
    }))
}

/// GET /health
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}

/// POST /solve
///
/// 链路在独立任务中运行。客户端断开时处理函数被 drop，取消守卫置位，
/// 链路在当前步骤提交完成后停止；等待超过 `request_timeout` 时返回 504。
pub async fn solve(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QuizChainRequest>, JsonRejection>,
) -> (StatusCode, Json<SolveResponse>) {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!("⚠️ 请求体无效: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(SolveResponse::error(format!("请求体无效: {}", rejection.body_text()))),
            );
        }
    };

    info!("📨 收到解题请求: email={}, url={}", request.email, request.start_url);

    let cancel = CancelFlag::new();
    let driver = match state.gate.prepare(&request, cancel.clone()) {
        Ok(driver) => driver,
        Err(e) if e.kind() == ErrorKind::AuthenticationError => {
            return (
                StatusCode::FORBIDDEN,
                Json(SolveResponse::error(e.to_string()).with_kind(ErrorKind::AuthenticationError)),
            );
        }
        Err(e) => {
            error!("❌ 创建链路失败: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SolveResponse::error(e.to_string()).with_kind(e.kind())),
            );
        }
    };

    let guard = cancel.guard();
    let start_url = request.start_url.clone();
    let chain = tokio::spawn(async move { driver.run_from(&start_url).await });

    match tokio::time::timeout(state.request_timeout, chain).await {
        Ok(Ok(chain)) => {
            guard.disarm();
            (StatusCode::OK, Json(SolveResponse::from_chain(&chain)))
        }
        Ok(Err(e)) => {
            error!("❌ 链路任务异常退出: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SolveResponse::error(format!("链路任务异常退出: {e}")).with_kind(ErrorKind::Internal)),
            )
        }
        Err(_) => {
            warn!("⏰ 等待链路结果超过 {:?}，已通知链路停止", state.request_timeout);
            cancel.cancel();
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(SolveResponse::error(format!(
                    "等待链路结果超过 {} 秒",
                    state.request_timeout.as_secs()
                ))),
            )
        }
    }
}
