//! 请求入口 - 编排层
//!
//! 校验身份、为每个请求组装一套全新的协作者，并把链路结果整理成响应。

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, ErrorKind, GateError};
use crate::infrastructure::{ChromiumRenderer, SystemClock};
use crate::models::{ChainState, QuizChainRequest, StepRecord, TerminationReason};
use crate::services::{
    AnswerReasoner, ContentExtractor, ExtractionLimits, HttpAnswerSubmitter, HttpPageFetcher, LlmService,
};
use crate::workflow::{CancelFlag, ChainDeps, ChainDriver, Credentials, DriverPolicy};

/// 为每条链路创建驱动器
pub trait DriverFactory: Send + Sync {
    fn build(&self, credentials: Credentials) -> Result<ChainDriver, AppError>;
}

/// 生产环境使用的工厂：真实 HTTP、浏览器与模型
pub struct LiveDriverFactory {
    config: Arc<Config>,
}

impl LiveDriverFactory {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl DriverFactory for LiveDriverFactory {
    fn build(&self, credentials: Credentials) -> Result<ChainDriver, AppError> {
        let config = self.config.as_ref();

        // 每条链路独立的 cookie 与浏览器会话
        let renderer = Arc::new(ChromiumRenderer::new(config));
        let fetcher = HttpPageFetcher::new(config, renderer)?;
        let submitter = HttpAnswerSubmitter::new(fetcher.client());
        let reasoner = AnswerReasoner::new(Arc::new(LlmService::new(config)));

        let deps = ChainDeps {
            fetcher: Arc::new(fetcher),
            extractor: Arc::new(ContentExtractor::new(ExtractionLimits::from_config(config))),
            reasoner: Arc::new(reasoner),
            submitter: Arc::new(submitter),
            clock: Arc::new(SystemClock),
        };
        Ok(ChainDriver::new(deps, credentials, DriverPolicy::from_config(config)))
    }
}

/// 请求入口
pub struct RequestGate {
    config: Arc<Config>,
    factory: Arc<dyn DriverFactory>,
}

impl RequestGate {
    pub fn new(config: Arc<Config>, factory: Arc<dyn DriverFactory>) -> Self {
        Self { config, factory }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// email 与 secret 必须和配置完全一致（区分大小写）
    pub fn authenticate(&self, request: &QuizChainRequest) -> Result<Credentials, GateError> {
        if request.email != self.config.expected_email {
            warn!("🔒 email 不匹配: {}", request.email);
            return Err(GateError::EmailMismatch);
        }
        if request.secret != self.config.expected_secret.expose_secret() {
            warn!("🔒 secret 不匹配 (email: {})", request.email);
            return Err(GateError::SecretMismatch);
        }
        Ok(Credentials {
            email: request.email.clone(),
            secret: SecretString::from(request.secret.clone()),
        })
    }

    /// 校验通过后创建驱动器；校验失败时不做任何链路工作
    pub fn prepare(&self, request: &QuizChainRequest, cancel: CancelFlag) -> Result<ChainDriver, AppError> {
        let credentials = self.authenticate(request)?;
        info!("🔓 身份校验通过，起始地址: {}", request.start_url);
        Ok(self.factory.build(credentials)?.with_cancel_flag(cancel))
    }
}

/// `/solve` 响应
#[derive(Debug, Clone, Serialize)]
pub struct SolveResponse {
    pub status: &'static str,
    pub message: String,
    pub result: SolveResult,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SolveResult {
    pub questions_solved: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub elapsed_secs: f64,
    pub steps: Vec<StepRecord>,
}

impl SolveResponse {
    /// 把终止的链路整理成响应
    pub fn from_chain(state: &ChainState) -> Self {
        let solved = state.questions_solved;
        let reason = state.termination_reason();
        let detail = state
            .failure
            .as_ref()
            .map(|f| format!("{}: {}", f.kind, f.message))
            .unwrap_or_default();

        let message = match reason {
            Some(TerminationReason::Success) => format!("链路完成，共解答 {solved} 题"),
            Some(TerminationReason::Timeout) if detail.is_empty() => {
                format!("超出 3 分钟时间预算，已解答 {solved} 题")
            }
            Some(TerminationReason::Timeout) => format!("超出 3 分钟时间预算，已解答 {solved} 题 ({detail})"),
            Some(TerminationReason::Error) => format!("链路出错，已解答 {solved} 题: {detail}"),
            Some(TerminationReason::ExternalStop) => format!(
                "链路被外部停止，已解答 {solved} 题: {}",
                state.stop_message.as_deref().unwrap_or("-")
            ),
            None => format!("链路未终止，已解答 {solved} 题"),
        };

        Self {
            status: if reason == Some(TerminationReason::Success) {
                "success"
            } else {
                "error"
            },
            message,
            result: SolveResult {
                questions_solved: solved,
                termination_reason: reason,
                error_kind: state.failure.as_ref().map(|f| f.kind),
                elapsed_secs: state.finished_at.map(|t| state.elapsed_secs(t)).unwrap_or_default(),
                steps: state.steps.clone(),
            },
        }
    }

    /// 没有链路结果时的错误响应
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
            result: SolveResult::default(),
        }
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.result.error_kind = Some(kind);
        self
    }
}
