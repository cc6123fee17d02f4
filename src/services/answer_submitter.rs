//! 答案提交服务 - 业务能力层

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::SubmitError;
use crate::services::extractor::resolve_url;
use crate::utils::logging::truncate_text;

/// 一次提交的内容
#[derive(Debug, Clone)]
pub struct Submission {
    pub email: String,
    pub secret: SecretString,
    /// 当前题目页面地址
    pub url: String,
    pub answer: Value,
}

impl Submission {
    /// 发送到服务端的 JSON
    pub fn to_payload(&self) -> Value {
        json!({
            "email": self.email,
            "secret": self.secret.expose_secret(),
            "url": self.url,
            "answer": self.answer,
        })
    }
}

/// 服务端给出的下一步
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// 继续下一题
    Continue(String),
    /// 链路结束
    Complete,
    /// 服务端要求停止
    Stop(Option<String>),
}

/// 提交结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub correct: Option<bool>,
    pub reason: Option<String>,
    pub next: NextStep,
}

impl SubmissionOutcome {
    /// 解释服务端响应，相对地址按 `base` 解析。响应不是对象时返回 `None`
    pub fn interpret(body: &Value, base: &str) -> Option<Self> {
        let object = body.as_object()?;

        let reason = object
            .get("reason")
            .or_else(|| object.get("message"))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);

        let stopped = object.get("stop").and_then(Value::as_bool).unwrap_or(false)
            || object
                .get("status")
                .and_then(Value::as_str)
                .is_some_and(|s| s.eq_ignore_ascii_case("stop"));

        let next = if stopped {
            NextStep::Stop(reason.clone())
        } else {
            match object.get("url").and_then(Value::as_str).map(str::trim) {
                Some(url) if !url.is_empty() => {
                    NextStep::Continue(resolve_url(base, url).unwrap_or_else(|| url.to_string()))
                }
                _ => NextStep::Complete,
            }
        };

        Some(Self {
            correct: object.get("correct").and_then(Value::as_bool),
            reason,
            next,
        })
    }
}

#[async_trait]
pub trait AnswerSubmitter: Send + Sync {
    /// 提交一次答案，不在内部重试
    async fn submit(
        &self,
        endpoint: &str,
        submission: &Submission,
        timeout: Duration,
    ) -> Result<SubmissionOutcome, SubmitError>;
}

/// HTTP 提交器
pub struct HttpAnswerSubmitter {
    client: reqwest::Client,
}

impl HttpAnswerSubmitter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn transient(endpoint: &str, message: impl ToString) -> SubmitError {
        SubmitError::Transient {
            url: endpoint.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl AnswerSubmitter for HttpAnswerSubmitter {
    async fn submit(
        &self,
        endpoint: &str,
        submission: &Submission,
        timeout: Duration,
    ) -> Result<SubmissionOutcome, SubmitError> {
        debug!("📤 POST {} answer={}", endpoint, submission.answer);

        let request = async {
            let response = self
                .client
                .post(endpoint)
                .json(&submission.to_payload())
                .send()
                .await
                .map_err(|e| Self::transient(endpoint, e))?;
            let status = response.status();
            let body = response.text().await.map_err(|e| Self::transient(endpoint, e))?;
            Ok::<_, SubmitError>((status, body))
        };

        let (status, body) = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| Self::transient(endpoint, format!("超时 ({timeout:?})")))??;

        if status.is_server_error() {
            return Err(Self::transient(endpoint, format!("状态码 {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(SubmitError::Rejected {
                url: endpoint.to_string(),
                status: status.as_u16(),
                body: truncate_text(&body, 200),
            });
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| SubmitError::BadResponse {
            url: endpoint.to_string(),
            message: e.to_string(),
        })?;
        debug!("📬 提交响应: {}", truncate_text(&value.to_string(), 300));

        SubmissionOutcome::interpret(&value, endpoint).ok_or_else(|| SubmitError::BadResponse {
            url: endpoint.to_string(),
            message: "响应不是 JSON 对象".to_string(),
        })
    }
}
