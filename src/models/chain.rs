//! 链路状态
//!
//! `ChainState` 只由链路驱动器修改。截止时间在创建时确定，之后不再变化；
//! 终止只会发生一次。

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::CHAIN_BUDGET;
use crate::error::ErrorKind;
use crate::models::quiz::ContentType;

/// 终止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    Success,
    Timeout,
    Error,
    ExternalStop,
}

/// 链路所处状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    Running,
    Success,
    Timeout,
    Error,
    ExternalStop,
}

impl From<TerminationReason> for ChainStatus {
    fn from(reason: TerminationReason) -> Self {
        match reason {
            TerminationReason::Success => ChainStatus::Success,
            TerminationReason::Timeout => ChainStatus::Timeout,
            TerminationReason::Error => ChainStatus::Error,
            TerminationReason::ExternalStop => ChainStatus::ExternalStop,
        }
    }
}

/// 失败详情
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// 已提交步骤的记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub url: String,
    pub content_type: ContentType,
    pub rendered: bool,
    pub submit_url: String,
    pub answer: Value,
    /// 服务端判定是否正确（若有）
    pub correct: Option<bool>,
    pub server_reason: Option<String>,
    pub elapsed_ms: u64,
}

/// 链路状态
#[derive(Debug, Clone, Serialize)]
pub struct ChainState {
    pub questions_solved: u32,
    pub started_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    /// 驱动器退出循环的时间
    pub finished_at: Option<DateTime<Utc>>,
    pub current_url: String,
    terminated: bool,
    termination_reason: Option<TerminationReason>,
    pub failure: Option<ChainFailure>,
    /// 外部停止时服务端给出的说明
    pub stop_message: Option<String>,
    pub steps: Vec<StepRecord>,
    /// 已开始的步骤数（包括失败的步骤）
    pub steps_attempted: usize,
}

impl ChainState {
    /// 创建新链路，截止时间 = 开始时间 + 固定预算
    pub fn new(start_url: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        let budget = chrono::Duration::from_std(CHAIN_BUDGET).unwrap_or_else(|_| chrono::Duration::minutes(3));
        Self {
            questions_solved: 0,
            started_at,
            deadline: started_at + budget,
            finished_at: None,
            current_url: start_url.into(),
            terminated: false,
            termination_reason: None,
            failure: None,
            stop_message: None,
            steps: Vec::new(),
            steps_attempted: 0,
        }
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination_reason
    }

    pub fn status(&self) -> ChainStatus {
        self.termination_reason
            .map(ChainStatus::from)
            .unwrap_or(ChainStatus::Running)
    }

    /// 距截止时间的剩余预算；已过期返回 `None`
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.deadline - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// 记录一次成功提交。有下一题时更新 `current_url`
    pub fn record_submission(&mut self, record: StepRecord, next_url: Option<String>) {
        if self.terminated {
            return;
        }
        self.questions_solved += 1;
        self.steps.push(record);
        if let Some(url) = next_url {
            self.current_url = url;
        }
    }

    /// 终止链路，只有第一次调用生效。返回本次调用是否生效
    pub fn terminate(&mut self, reason: TerminationReason, failure: Option<ChainFailure>) -> bool {
        if self.terminated {
            return false;
        }
        self.terminated = true;
        self.termination_reason = Some(reason);
        self.failure = failure;
        true
    }

    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn record(index: usize) -> StepRecord {
        StepRecord {
            index,
            url: format!("https://quiz/{index}"),
            content_type: ContentType::Html,
            rendered: false,
            submit_url: "https://quiz/submit".into(),
            answer: Value::from(42),
            correct: Some(true),
            server_reason: None,
            elapsed_ms: 10,
        }
    }

    #[test]
    fn test_deadline_is_three_minutes_after_start() {
        let state = ChainState::new("https://quiz/1", start());
        assert_eq!(state.deadline() - state.started_at, chrono::Duration::minutes(3));
        assert_eq!(state.status(), ChainStatus::Running);
    }

    #[test]
    fn test_terminate_only_once() {
        let mut state = ChainState::new("https://quiz/1", start());
        assert!(state.terminate(TerminationReason::Timeout, None));
        assert!(!state.terminate(TerminationReason::Success, None));
        assert_eq!(state.termination_reason(), Some(TerminationReason::Timeout));
        assert_eq!(state.status(), ChainStatus::Timeout);
    }

    #[test]
    fn test_record_submission_updates_url_and_counter() {
        let mut state = ChainState::new("https://quiz/1", start());
        state.record_submission(record(1), Some("https://quiz/2".into()));
        assert_eq!(state.questions_solved, 1);
        assert_eq!(state.current_url, "https://quiz/2");

        state.record_submission(record(2), None);
        assert_eq!(state.questions_solved, 2);
        assert_eq!(state.current_url, "https://quiz/2");

        state.terminate(TerminationReason::Success, None);
        state.record_submission(record(3), Some("https://quiz/4".into()));
        assert_eq!(state.questions_solved, 2);
    }

    #[test]
    fn test_remaining() {
        let state = ChainState::new("https://quiz/1", start());
        let remaining = state.remaining(start() + chrono::Duration::seconds(60)).unwrap();
        assert_eq!(remaining.as_secs(), 120);
        assert!(state.remaining(start() + chrono::Duration::minutes(3)).is_none());
        assert!(state.remaining(start() + chrono::Duration::minutes(4)).is_none());
    }
}
