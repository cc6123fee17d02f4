//! 集成测试共用的假协作者
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::SecretString;
use serde_json::Value;

use quiz_chain_solver::error::{AppError, FetchError, ReasonError, SubmitError};
use quiz_chain_solver::infrastructure::Clock;
use quiz_chain_solver::models::{
    AnswerFormat, AnswerValue, ContentType, ExtractedContent, NextAction, QuizStep, ReasonedAnswer,
};
use quiz_chain_solver::orchestrator::DriverFactory;
use quiz_chain_solver::services::{
    AnswerSubmitter, ContentExtractor, NextStep, PageFetcher, Reasoner, Submission, SubmissionOutcome,
};
use quiz_chain_solver::workflow::{CancelFlag, ChainDeps, ChainDriver, Credentials, DriverPolicy};

pub const EMAIL: &str = "student@example.com";
pub const SECRET: &str = "s3cret";
pub const BASE: &str = "https://quiz.example.com";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
}

pub fn credentials() -> Credentials {
    Credentials {
        email: EMAIL.to_string(),
        secret: SecretString::from(SECRET.to_string()),
    }
}

/// 带提交链接的题目页面
pub fn quiz_page(n: usize) -> String {
    format!(
        r#"<html><body><div id="result">Q{n}. What is {n} times 2? Post your answer to <a href="/submit">/submit</a>.</div></body></html>"#
    )
}

pub fn quiz_url(n: usize) -> String {
    format!("{BASE}/quiz/{n}")
}

pub fn submit_url() -> String {
    format!("{BASE}/submit")
}

pub fn answer(value: i64) -> ReasonedAnswer {
    ReasonedAnswer {
        answer_value: AnswerValue::from_json(Value::from(value)),
        confidence_notes: None,
        next_action: NextAction::SubmitAndContinue,
        answer_format: AnswerFormat::Number,
        submit_url: None,
    }
}

pub fn next(url: impl Into<String>) -> SubmissionOutcome {
    SubmissionOutcome {
        correct: Some(true),
        reason: None,
        next: NextStep::Continue(url.into()),
    }
}

pub fn complete() -> SubmissionOutcome {
    SubmissionOutcome {
        correct: Some(true),
        reason: None,
        next: NextStep::Complete,
    }
}

// ========== 时钟 ==========

/// 手动推进的时钟，`sleep` 直接把时间往前拨
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, duration: Duration) {
        let step = chrono::Duration::from_std(duration).unwrap();
        *self.now.lock().unwrap() += step;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

// ========== 抓取 ==========

/// 按地址返回预设结果；每次调用把时钟往前拨 `cost`
pub struct ScriptedFetcher {
    clock: Arc<ManualClock>,
    cost: Duration,
    /// 真实等待，用于让请求级超时先于链路触发
    delay: Option<Duration>,
    responses: Mutex<HashMap<String, VecDeque<Result<QuizStep, FetchError>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            cost: Duration::from_secs(1),
            delay: None,
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_cost(mut self, cost: Duration) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn page(self, url: &str, html: &str) -> Self {
        let step = QuizStep::new(url, html.as_bytes().to_vec(), ContentType::Html);
        self.push(url, Ok(step))
    }

    pub fn file(self, url: &str, body: &[u8], content_type: ContentType) -> Self {
        let step = QuizStep::new(url, body.to_vec(), content_type);
        self.push(url, Ok(step))
    }

    pub fn failure(self, url: &str) -> Self {
        let err = FetchError::Status {
            url: url.to_string(),
            status: 503,
        };
        self.push(url, Err(err))
    }

    fn push(self, url: &str, result: Result<QuizStep, FetchError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<QuizStep, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.clock.advance(self.cost);
        self.responses
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            })
    }
}

// ========== 推理 ==========

pub struct ScriptedReasoner {
    clock: Arc<ManualClock>,
    cost: Duration,
    answers: Mutex<VecDeque<Result<ReasonedAnswer, ReasonError>>>,
    seen: Mutex<Vec<ExtractedContent>>,
}

impl ScriptedReasoner {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            cost: Duration::from_secs(2),
            answers: Mutex::new(VecDeque::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_cost(mut self, cost: Duration) -> Self {
        self.cost = cost;
        self
    }

    pub fn then(self, result: Result<ReasonedAnswer, ReasonError>) -> Self {
        self.answers.lock().unwrap().push_back(result);
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<ExtractedContent> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reason(
        &self,
        _page_url: &str,
        content: &ExtractedContent,
        timeout: Duration,
    ) -> Result<ReasonedAnswer, ReasonError> {
        self.seen.lock().unwrap().push(content.clone());
        let result = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ReasonError::Timeout { after: timeout }));
        // 超时的调用按超时时长计费
        match &result {
            Err(ReasonError::Timeout { .. }) => self.clock.advance(timeout),
            _ => self.clock.advance(self.cost),
        }
        result
    }
}

// ========== 提交 ==========

pub struct ScriptedSubmitter {
    clock: Arc<ManualClock>,
    outcomes: Mutex<VecDeque<Result<SubmissionOutcome, SubmitError>>>,
    submissions: Mutex<Vec<(String, Value)>>,
    /// 提交时顺手置位，模拟客户端在链路中途断开
    cancel_on_submit: Option<CancelFlag>,
}

impl ScriptedSubmitter {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            outcomes: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            cancel_on_submit: None,
        }
    }

    pub fn cancelling(mut self, cancel: CancelFlag) -> Self {
        self.cancel_on_submit = Some(cancel);
        self
    }

    pub fn then(self, result: Result<SubmissionOutcome, SubmitError>) -> Self {
        self.outcomes.lock().unwrap().push_back(result);
        self
    }

    /// (提交地址, 请求体)
    pub fn submissions(&self) -> Vec<(String, Value)> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnswerSubmitter for ScriptedSubmitter {
    async fn submit(
        &self,
        endpoint: &str,
        submission: &Submission,
        _timeout: Duration,
    ) -> Result<SubmissionOutcome, SubmitError> {
        self.submissions
            .lock()
            .unwrap()
            .push((endpoint.to_string(), submission.to_payload()));
        self.clock.advance(Duration::from_millis(500));
        if let Some(cancel) = &self.cancel_on_submit {
            cancel.cancel();
        }
        self.outcomes.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(SubmitError::Rejected {
                url: endpoint.to_string(),
                status: 400,
                body: "unexpected submission".to_string(),
            })
        })
    }
}

// ========== 组装 ==========

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub reasoner: Arc<ScriptedReasoner>,
    pub submitter: Arc<ScriptedSubmitter>,
}

impl Harness {
    pub fn new(
        clock: Arc<ManualClock>,
        fetcher: ScriptedFetcher,
        reasoner: ScriptedReasoner,
        submitter: ScriptedSubmitter,
    ) -> Self {
        Self {
            clock,
            fetcher: Arc::new(fetcher),
            reasoner: Arc::new(reasoner),
            submitter: Arc::new(submitter),
        }
    }

    pub fn driver(&self) -> ChainDriver {
        self.driver_with(DriverPolicy::default())
    }

    pub fn driver_with(&self, policy: DriverPolicy) -> ChainDriver {
        let deps = ChainDeps {
            fetcher: self.fetcher.clone(),
            extractor: Arc::new(ContentExtractor::default()),
            reasoner: self.reasoner.clone(),
            submitter: self.submitter.clone(),
            clock: self.clock.clone() as Arc<dyn Clock>,
        };
        ChainDriver::new(deps, credentials(), policy)
    }
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()))
}

/// 每次 build 都交出同一套假协作者组装的驱动器
pub struct HarnessFactory {
    pub harness: Harness,
}

impl DriverFactory for HarnessFactory {
    fn build(&self, credentials: Credentials) -> Result<ChainDriver, AppError> {
        assert_eq!(credentials.email, EMAIL);
        Ok(self.harness.driver())
    }
}
