//! API 模块
//!
//! 负责所有与外部系统的交互：对外提供 `/solve` 等 HTTP 接口

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::orchestrator::RequestGate;

pub use handlers::SERVICE_NAME;

/// 路由共享状态
pub struct AppState {
    pub gate: RequestGate,
    /// 处理函数等待链路结果的最长时间
    pub request_timeout: Duration,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/solve", post(handlers::solve))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
