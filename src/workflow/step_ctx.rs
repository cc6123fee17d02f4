//! 步骤上下文
//!
//! 封装"我正在处理链路中的第几题、在哪个地址"这一信息

use std::fmt::Display;

use chrono::{DateTime, Utc};

/// 步骤上下文
#[derive(Debug, Clone)]
pub struct StepCtx {
    /// 步骤序号（从1开始，包括失败的步骤）
    pub index: usize,

    /// 题目页面地址
    pub url: String,

    /// 本步骤开始时间
    pub started_at: DateTime<Utc>,
}

impl StepCtx {
    pub fn new(index: usize, url: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            index,
            url: url.into(),
            started_at,
        }
    }
}

impl Display for StepCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[步骤 #{} {}]", self.index, self.url)
    }
}
