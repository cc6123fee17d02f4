//! 应用 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：输出启动信息、组装请求入口与路由
//! 2. **服务运行**：监听端口，收到 Ctrl+C 后优雅退出
//!
//! 不持有任何链路资源：浏览器、HTTP 客户端、模型调用都按请求创建。

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::orchestrator::request_gate::{DriverFactory, LiveDriverFactory, RequestGate};
use crate::utils::logging::log_startup;

/// 应用主结构
pub struct App {
    config: Arc<Config>,
    router: Router,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let factory: Arc<dyn DriverFactory> = Arc::new(LiveDriverFactory::new(config.clone()));
        Ok(Self::with_factory(config, factory))
    }

    /// 使用指定的驱动器工厂组装应用
    pub fn with_factory(config: Arc<Config>, factory: Arc<dyn DriverFactory>) -> Self {
        log_startup(&config);

        let state = Arc::new(AppState {
            gate: RequestGate::new(config.clone(), factory),
            request_timeout: config.request_timeout(),
        });

        Self {
            router: create_router(state),
            config,
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// 运行 HTTP 服务直到收到退出信号
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.listen_host, self.config.listen_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("无法监听 {addr}"))?;

        info!("🚀 服务已启动: http://{}", addr);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP 服务异常退出")?;

        info!("👋 服务已停止");
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("收到退出信号，正在关闭服务...");
    }
}
