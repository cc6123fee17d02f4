//! 链路驱动 - 流程层
//!
//! 核心职责：定义"一条题目链"的完整处理流程
//!
//! 每一步的顺序：
//! 1. 抓取页面（失败重试一次）
//! 2. 提取内容，附带的数据文件一并下载合并
//! 3. 请求模型作答（超时且预算允许时重试一次）
//! 4. 提交答案（临时失败重试一次）
//! 5. 根据服务端响应继续、结束或停止
//!
//! 驱动器从不返回错误：任何失败都变成 `ChainState` 的终止原因。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, ErrorKind, FetchError, ReasonError, SubmitError};
use crate::infrastructure::Clock;
use crate::models::{
    ChainFailure, ChainState, ExtractedContent, NextAction, QuizStep, ReasonedAnswer, StepRecord,
    TerminationReason,
};
use crate::services::extractor::resolve_url;
use crate::services::{
    merge_attachment, AnswerSubmitter, ContentExtractor, NextStep, PageFetcher, Reasoner, Submission,
    SubmissionOutcome,
};
use crate::utils::logging::{log_chain_start, log_chain_summary, truncate_text};
use crate::workflow::step_ctx::StepCtx;

/// 调用模型时给截止时间留出的余量，保证模型超时严格小于剩余预算
const REASONING_MARGIN: Duration = Duration::from_secs(1);

/// 一条链路用到的全部协作者，每个请求一套
pub struct ChainDeps {
    pub fetcher: Arc<dyn PageFetcher>,
    pub extractor: Arc<ContentExtractor>,
    pub reasoner: Arc<dyn Reasoner>,
    pub submitter: Arc<dyn AnswerSubmitter>,
    pub clock: Arc<dyn Clock>,
}

/// 提交答案时使用的身份
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub secret: SecretString,
}

/// 超时、重试与上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverPolicy {
    /// 单次抓取（含渲染）的上限
    pub fetch_timeout: Duration,
    pub reasoning_timeout: Duration,
    pub submit_timeout: Duration,
    pub retry_backoff: Duration,
    pub max_steps: usize,
    pub max_attachments: usize,
}

impl DriverPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs + config.render_timeout_secs),
            reasoning_timeout: Duration::from_secs(config.reasoning_timeout_secs),
            submit_timeout: Duration::from_secs(config.submit_timeout_secs),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_steps: config.max_steps,
            max_attachments: config.max_attachments,
        }
    }
}

impl Default for DriverPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 取消标记，客户端断开时置位
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// 被 drop 时自动取消，除非先调用了 `disarm`
    pub fn guard(&self) -> CancelOnDrop {
        CancelOnDrop {
            flag: Some(self.clone()),
        }
    }
}

/// 离开作用域时取消链路
#[derive(Debug)]
pub struct CancelOnDrop {
    flag: Option<CancelFlag>,
}

impl CancelOnDrop {
    pub fn disarm(mut self) {
        self.flag = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.flag.take() {
            flag.cancel();
        }
    }
}

/// 单步结果
enum StepOutcome {
    /// 提交成功，继续下一题
    Advance(StepRecord, String),
    /// 提交成功，链路结束
    Finish(StepRecord),
    /// 服务端要求停止
    Stop(Option<String>),
    Failed {
        reason: TerminationReason,
        failure: ChainFailure,
    },
}

/// 链路驱动器
///
/// - 串行执行，不预取
/// - 只在每一步开始前检查截止时间和取消标记
/// - 不持有任何跨请求的资源
pub struct ChainDriver {
    deps: ChainDeps,
    credentials: Credentials,
    policy: DriverPolicy,
    cancel: CancelFlag,
}

impl ChainDriver {
    pub fn new(deps: ChainDeps, credentials: Credentials, policy: DriverPolicy) -> Self {
        Self {
            deps,
            credentials,
            policy,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// 从起始地址开始一条新链路，截止时间 = 现在 + 3 分钟
    pub async fn run_from(&self, start_url: &str) -> ChainState {
        let state = ChainState::new(start_url, self.deps.clock.now());
        self.run(state).await
    }

    /// 运行到终止为止
    pub async fn run(&self, mut state: ChainState) -> ChainState {
        log_chain_start(&state.current_url, state.deadline());

        while !state.is_terminated() {
            if self.cancel.is_cancelled() {
                warn!("🛑 客户端已断开，停止链路");
                state.stop_message = Some("客户端已断开连接".to_string());
                state.terminate(TerminationReason::ExternalStop, None);
                break;
            }

            let now = self.deps.clock.now();
            if state.remaining(now).is_none() {
                warn!("⏰ 已超出时间预算，已完成 {} 题", state.questions_solved);
                state.terminate(TerminationReason::Timeout, None);
                break;
            }

            if state.steps_attempted >= self.policy.max_steps {
                error!("❌ 已达到最大步骤数 {}", self.policy.max_steps);
                state.terminate(
                    TerminationReason::Error,
                    Some(ChainFailure {
                        kind: ErrorKind::StepLimitReached,
                        message: format!("已达到最大步骤数 {}", self.policy.max_steps),
                    }),
                );
                break;
            }

            state.steps_attempted += 1;
            let ctx = StepCtx::new(state.steps_attempted, state.current_url.clone(), now);

            match self.run_step(&ctx, &state).await {
                StepOutcome::Advance(record, next_url) => {
                    info!("{} ✅ 提交完成，下一题: {}", ctx, next_url);
                    state.record_submission(record, Some(next_url));
                }
                StepOutcome::Finish(record) => {
                    info!("{} 🏁 提交完成，链路结束", ctx);
                    state.record_submission(record, None);
                    state.terminate(TerminationReason::Success, None);
                }
                StepOutcome::Stop(message) => {
                    warn!("{} 🛑 服务端要求停止: {}", ctx, message.as_deref().unwrap_or("-"));
                    state.stop_message = message;
                    state.terminate(TerminationReason::ExternalStop, None);
                }
                StepOutcome::Failed { reason, failure } => {
                    error!("{} ❌ {}: {}", ctx, failure.kind, failure.message);
                    state.terminate(reason, Some(failure));
                }
            }
        }

        let finished_at = self.deps.clock.now();
        state.finished_at = Some(finished_at);
        log_chain_summary(&state, finished_at);
        state
    }

    async fn run_step(&self, ctx: &StepCtx, state: &ChainState) -> StepOutcome {
        // ========== 1. 抓取 ==========
        info!("{} 📥 抓取题目页面", ctx);
        let step = match self.fetch_with_retry(ctx, state).await {
            Ok(step) => Arc::new(step),
            Err(e) => return self.fail(state, ErrorKind::FetchError, e.to_string()),
        };

        // ========== 2. 提取 ==========
        let mut content = match self.deps.extractor.clone().spawn_extract(step.clone()).await {
            Ok(content) => content,
            Err(e) => return self.fail(state, e.kind(), e.to_string()),
        };
        info!(
            "{} 📝 题目({}{}): {}",
            ctx,
            step.content_type,
            if step.rendered { "，已渲染" } else { "" },
            truncate_text(&content.question_text, 80)
        );
        self.attach_data_files(ctx, state, &mut content).await;

        // ========== 3. 推理 ==========
        let answer = match self.reason_with_retry(ctx, state, &content).await {
            Ok(answer) => answer,
            Err(outcome) => return outcome,
        };

        if answer.next_action == NextAction::Abstain {
            let notes = answer.confidence_notes.as_deref().unwrap_or("无说明");
            return self.fail(state, ErrorKind::Abstained, format!("模型放弃作答: {notes}"));
        }

        // ========== 4. 提交 ==========
        let Some(endpoint) = answer
            .submit_url
            .as_deref()
            .or(content.submit_url.as_deref())
            .and_then(|url| resolve_url(&step.url, url))
        else {
            return self.fail(state, ErrorKind::SubmissionError, SubmitError::MissingEndpoint.to_string());
        };

        let submission = Submission {
            email: self.credentials.email.clone(),
            secret: self.credentials.secret.clone(),
            url: ctx.url.clone(),
            answer: answer.answer_value.to_json(),
        };
        info!("{} 📤 提交答案 {} -> {}", ctx, truncate_text(&answer.answer_value.to_string(), 60), endpoint);

        let outcome = match self.submit_with_retry(ctx, state, &endpoint, &submission).await {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(state, ErrorKind::SubmissionError, e.to_string()),
        };

        // ========== 5. 处理响应 ==========
        if outcome.correct == Some(false) {
            warn!("{} ⚠️ 服务端判定答案错误: {}", ctx, outcome.reason.as_deref().unwrap_or("-"));
        }
        let record = self.record(ctx, &step, &endpoint, &submission, &outcome);

        match outcome.next {
            NextStep::Stop(message) => StepOutcome::Stop(message),
            NextStep::Complete => StepOutcome::Finish(record),
            NextStep::Continue(next_url) if answer.next_action == NextAction::SubmitAndTerminate => {
                info!("{} 模型判断这是最后一题，忽略下一题地址 {}", ctx, next_url);
                StepOutcome::Finish(record)
            }
            NextStep::Continue(next_url) => StepOutcome::Advance(record, next_url),
        }
    }

    async fn fetch_with_retry(&self, ctx: &StepCtx, state: &ChainState) -> Result<QuizStep, FetchError> {
        let mut attempt = 1;
        loop {
            let Some(remaining) = state.remaining(self.deps.clock.now()) else {
                return Err(FetchError::Timeout {
                    url: ctx.url.clone(),
                    timeout: Duration::ZERO,
                });
            };

            match self.deps.fetcher.fetch(&ctx.url, self.policy.fetch_timeout.min(remaining)).await {
                Ok(step) => return Ok(step),
                Err(e) if attempt == 1 => {
                    warn!("{} ⚠️ 抓取失败，稍后重试: {}", ctx, e);
                    self.backoff(state).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 下载并合并数据文件，失败只记录不终止
    async fn attach_data_files(&self, ctx: &StepCtx, state: &ChainState, content: &mut ExtractedContent) {
        let links: Vec<String> = content
            .data_links
            .iter()
            .filter(|link| **link != ctx.url)
            .take(self.policy.max_attachments)
            .cloned()
            .collect();
        let skipped = content.data_links.len().saturating_sub(links.len());
        if skipped > 0 && links.len() == self.policy.max_attachments {
            content
                .notes
                .push(format!("Skipped {skipped} additional data file(s) beyond the attachment limit."));
        }

        for link in links {
            let Some(remaining) = state.remaining(self.deps.clock.now()) else {
                content.notes.push(format!("Attachment {link} skipped: time budget exhausted."));
                break;
            };

            debug!("{} 📎 下载数据文件 {}", ctx, link);
            let attachment = match self.deps.fetcher.fetch(&link, self.policy.fetch_timeout.min(remaining)).await {
                Ok(file) => self
                    .deps
                    .extractor
                    .clone()
                    .spawn_extract(Arc::new(file))
                    .await
                    .map_err(AppError::from),
                Err(e) => Err(AppError::from(e)),
            };

            match attachment {
                Ok(extracted) => {
                    info!("{} 📎 已合并数据文件 {}", ctx, link);
                    merge_attachment(content, &link, extracted, self.deps.extractor.limits());
                }
                Err(e) => {
                    warn!("{} ⚠️ 数据文件 {} 不可用: {}", ctx, link, e);
                    content.notes.push(format!("Attachment {link} could not be used: {e}"));
                }
            }
        }
    }

    async fn reason_with_retry(
        &self,
        ctx: &StepCtx,
        state: &ChainState,
        content: &ExtractedContent,
    ) -> Result<ReasonedAnswer, StepOutcome> {
        let mut attempt = 1;
        loop {
            let budget = state
                .remaining(self.deps.clock.now())
                .and_then(|r| r.checked_sub(REASONING_MARGIN))
                .filter(|r| !r.is_zero());
            let Some(budget) = budget else {
                return Err(StepOutcome::Failed {
                    reason: TerminationReason::Timeout,
                    failure: ChainFailure {
                        kind: ErrorKind::ReasoningTimeoutError,
                        message: "剩余时间不足以调用模型".to_string(),
                    },
                });
            };
            let timeout = self.policy.reasoning_timeout.min(budget);

            info!("{} 🤖 请求模型作答（第 {} 次，超时 {:?}）", ctx, attempt, timeout);
            let error = match self.deps.reasoner.reason(&ctx.url, content, timeout).await {
                Ok(answer) => {
                    debug!("{} 模型说明: {}", ctx, answer.confidence_notes.as_deref().unwrap_or("-"));
                    return Ok(answer);
                }
                Err(e) => e,
            };

            if matches!(error, ReasonError::Parse { .. }) {
                return Err(self.fail(state, error.kind(), error.to_string()));
            }

            if attempt == 1 && self.budget_allows_retry(ctx, state) {
                warn!("{} ⚠️ 模型调用失败，重试一次: {}", ctx, error);
                attempt += 1;
                continue;
            }

            // 第二次超时或预算不足一律记为超时；服务错误按截止时间判断
            let (kind, message) = (error.kind(), error.to_string());
            return Err(if matches!(error, ReasonError::Timeout { .. }) {
                StepOutcome::Failed {
                    reason: TerminationReason::Timeout,
                    failure: ChainFailure { kind, message },
                }
            } else {
                self.fail(state, kind, message)
            });
        }
    }

    /// 剩余预算是否还够再走一遍本步骤已经花掉的时间
    fn budget_allows_retry(&self, ctx: &StepCtx, state: &ChainState) -> bool {
        let now = self.deps.clock.now();
        let spent = (now - ctx.started_at).to_std().unwrap_or_default();
        state.remaining(now).is_some_and(|remaining| remaining >= spent)
    }

    async fn submit_with_retry(
        &self,
        ctx: &StepCtx,
        state: &ChainState,
        endpoint: &str,
        submission: &Submission,
    ) -> Result<SubmissionOutcome, SubmitError> {
        let mut attempt = 1;
        loop {
            let Some(remaining) = state.remaining(self.deps.clock.now()) else {
                return Err(SubmitError::Transient {
                    url: endpoint.to_string(),
                    message: "提交前已超出时间预算".to_string(),
                });
            };

            match self
                .deps
                .submitter
                .submit(endpoint, submission, self.policy.submit_timeout.min(remaining))
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt == 1 && e.is_transient() => {
                    warn!("{} ⚠️ 提交失败，稍后重试: {}", ctx, e);
                    self.backoff(state).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn backoff(&self, state: &ChainState) {
        let wait = state
            .remaining(self.deps.clock.now())
            .map(|remaining| remaining.min(self.policy.retry_backoff))
            .unwrap_or_default();
        if !wait.is_zero() {
            self.deps.clock.sleep(wait).await;
        }
    }

    /// 截止时间已过的失败记为超时，否则记为错误
    fn fail(&self, state: &ChainState, kind: ErrorKind, message: String) -> StepOutcome {
        let reason = if state.remaining(self.deps.clock.now()).is_none() {
            TerminationReason::Timeout
        } else {
            TerminationReason::Error
        };
        StepOutcome::Failed {
            reason,
            failure: ChainFailure { kind, message },
        }
    }

    fn record(
        &self,
        ctx: &StepCtx,
        step: &QuizStep,
        endpoint: &str,
        submission: &Submission,
        outcome: &SubmissionOutcome,
    ) -> StepRecord {
        let elapsed = self.deps.clock.now() - ctx.started_at;
        StepRecord {
            index: ctx.index,
            url: ctx.url.clone(),
            content_type: step.content_type,
            rendered: step.rendered,
            submit_url: endpoint.to_string(),
            answer: submission.answer.clone(),
            correct: outcome.correct,
            server_reason: outcome.reason.clone(),
            elapsed_ms: elapsed.num_milliseconds().max(0) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_guard_cancels_on_drop() {
        let flag = CancelFlag::new();
        {
            let _guard = flag.guard();
        }
        assert!(flag.is_cancelled());

        let flag = CancelFlag::new();
        flag.guard().disarm();
        assert!(!flag.is_cancelled());
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = Config::test_config();
        config.fetch_timeout_secs = 10;
        config.render_timeout_secs = 15;
        config.retry_backoff_ms = 250;
        let policy = DriverPolicy::from_config(&config);
        assert_eq!(policy.fetch_timeout, Duration::from_secs(25));
        assert_eq!(policy.retry_backoff, Duration::from_millis(250));
        assert_eq!(policy.max_steps, 20);
    }
}
