//! 错误类型
//!
//! 每个组件一个错误枚举，`AppError` 负责汇总。
//! 所有错误都能映射到一个 [`ErrorKind`]，链路终止时以此对外报告失败类别。

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// 对外可见的错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    AuthenticationError,
    FetchError,
    UnsupportedContentError,
    ContentExtractionError,
    ReasoningTimeoutError,
    AnswerParseError,
    SubmissionError,
    /// 模型明确放弃作答
    Abstained,
    /// 超过步骤上限
    StepLimitReached,
    /// 模型服务本身出错（非超时）
    ModelUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthenticationError => "AuthenticationError",
            ErrorKind::FetchError => "FetchError",
            ErrorKind::UnsupportedContentError => "UnsupportedContentError",
            ErrorKind::ContentExtractionError => "ContentExtractionError",
            ErrorKind::ReasoningTimeoutError => "ReasoningTimeoutError",
            ErrorKind::AnswerParseError => "AnswerParseError",
            ErrorKind::SubmissionError => "SubmissionError",
            ErrorKind::Abstained => "Abstained",
            ErrorKind::StepLimitReached => "StepLimitReached",
            ErrorKind::ModelUnavailable => "ModelUnavailable",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("认证错误: {0}")]
    Gate(#[from] GateError),
    #[error("抓取错误: {0}")]
    Fetch(#[from] FetchError),
    #[error("内容提取错误: {0}")]
    Extract(#[from] ExtractError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Gate(_) => ErrorKind::AuthenticationError,
            AppError::Fetch(_) => ErrorKind::FetchError,
            AppError::Extract(e) => e.kind(),
        }
    }
}

/// 请求校验错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("email 不匹配")]
    EmailMismatch,
    #[error("secret 不匹配")]
    SecretMismatch,
}

/// 页面抓取错误
#[derive(Debug, Error)]
pub enum FetchError {
    /// 网络请求失败（无法连接、读取失败等）
    #[error("请求 {url} 失败: {message}")]
    Request { url: String, message: String },
    /// 返回非成功状态码
    #[error("请求 {url} 返回状态码 {status}")]
    Status { url: String, status: u16 },
    /// 超出时间预算
    #[error("请求 {url} 超时 ({timeout:?})")]
    Timeout { url: String, timeout: Duration },
    /// URL 不合法
    #[error("无效的 URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
    /// 渲染失败
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// 无头浏览器渲染错误
#[derive(Debug, Error)]
pub enum RenderError {
    /// 浏览器启动失败
    #[error("启动无头浏览器失败: {0}")]
    Launch(String),
    /// 导航失败
    #[error("导航到 {url} 失败: {message}")]
    Navigation { url: String, message: String },
    /// 执行脚本失败
    #[error("执行脚本失败: {0}")]
    Script(String),
    /// 渲染超时
    #[error("渲染 {url} 超时 ({timeout:?})")]
    Timeout { url: String, timeout: Duration },
    /// 渲染结果为空
    #[error("渲染 {url} 得到空页面")]
    Empty { url: String },
}

/// 内容提取错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// 无法识别或解码的内容
    #[error("不支持的内容 ({content_type}): {reason}")]
    Unsupported { content_type: String, reason: String },
    /// 无法得到有效内容（例如找不到题目文本）
    #[error("内容提取失败 [{strategy}]: {reason}")]
    Content { strategy: String, reason: String },
}

impl ExtractError {
    pub fn content(strategy: impl Into<String>, reason: impl Into<String>) -> Self {
        ExtractError::Content {
            strategy: strategy.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Unsupported { .. } => ErrorKind::UnsupportedContentError,
            ExtractError::Content { .. } => ErrorKind::ContentExtractionError,
        }
    }
}

/// 模型调用错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("LLM API调用失败 (模型: {model}): {message}")]
    Api { model: String, message: String },
    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
}

/// 推理错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReasonError {
    /// 模型调用超时
    #[error("模型调用超时 ({after:?})")]
    Timeout { after: Duration },
    /// 无法从模型输出中解析结构化答案
    #[error("无法解析模型答案: {reason} (响应: {excerpt})")]
    Parse { reason: String, excerpt: String },
    /// 模型服务错误
    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl ReasonError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReasonError::Timeout { .. } => ErrorKind::ReasoningTimeoutError,
            ReasonError::Parse { .. } => ErrorKind::AnswerParseError,
            ReasonError::Completion(_) => ErrorKind::ModelUnavailable,
        }
    }
}

/// 答案提交错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// 可重试的失败：网络错误、超时、5xx
    #[error("提交到 {url} 失败（可重试）: {message}")]
    Transient { url: String, message: String },
    /// 服务端拒绝（4xx）
    #[error("提交到 {url} 被拒绝 (状态码 {status}): {body}")]
    Rejected { url: String, status: u16, body: String },
    /// 响应无法解析
    #[error("无法解析 {url} 的提交响应: {message}")]
    BadResponse { url: String, message: String },
    /// 找不到提交地址
    #[error("找不到提交地址")]
    MissingEndpoint,
}

impl SubmitError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SubmitError::Transient { .. })
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置文件读取失败
    #[error("读取配置文件 {path} 失败: {message}")]
    FileReadFailed { path: String, message: String },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {message}")]
    TomlParseFailed { path: String, message: String },
    /// 配置值不合法
    #[error("配置项 {field} 不合法: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ========== 便捷构造函数 ==========

impl FetchError {
    pub fn request(url: impl Into<String>, source: impl fmt::Display) -> Self {
        FetchError::Request {
            url: url.into(),
            message: source.to_string(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        FetchError::Request {
            url,
            message: err.to_string(),
        }
    }
}

impl From<chromiumoxide::error::CdpError> for RenderError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        RenderError::Script(err.to_string())
    }
}
