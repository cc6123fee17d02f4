/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::{Config, CHAIN_BUDGET};
use crate::models::{ChainState, TerminationReason};

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 题目链自动解答服务");
    info!("📮 监听地址: {}:{}", config.listen_host, config.listen_port);
    info!("👤 学生邮箱: {}", config.expected_email);
    info!("🤖 模型: {} ({})", config.llm_model_name, config.llm_api_base_url);
    info!("⏱️ 链路预算: {} 秒，最多 {} 步", CHAIN_BUDGET.as_secs(), config.max_steps);
    info!("{}", "=".repeat(60));
}

/// 记录链路开始信息
pub fn log_chain_start(start_url: &str, deadline: DateTime<Utc>) {
    info!("\n{}", "=".repeat(60));
    info!("🔗 开始解答题目链: {}", start_url);
    info!("⏰ 截止时间: {}", deadline.format("%H:%M:%S"));
    info!("{}", "=".repeat(60));
}

/// 打印链路统计信息
pub fn log_chain_summary(state: &ChainState, now: DateTime<Utc>) {
    info!("\n{}", "─".repeat(60));
    info!("📊 题目链处理完成");
    info!("结束状态: {:?}", state.status());
    info!("✅ 已解答: {} 题 / 尝试 {} 步", state.questions_solved, state.steps_attempted);
    info!("⏱️ 耗时: {:.1} 秒", state.elapsed_secs(now));
    let wrong = state.steps.iter().filter(|s| s.correct == Some(false)).count();
    if wrong > 0 {
        warn!("⚠️ 其中 {} 题被判定为错误", wrong);
    }
    match (state.termination_reason(), &state.failure) {
        (Some(TerminationReason::Success), _) => {}
        (_, Some(failure)) => warn!("❌ 失败原因: {} - {}", failure.kind, failure.message),
        (_, None) => {}
    }
    info!("{}", "─".repeat(60));
}

/// 截断长文本
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（字符数，包含末尾的 `...`）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        let keep = max_len.saturating_sub(ELLIPSIS.len());
        text.chars().take(keep).collect::<String>() + ELLIPSIS
    } else {
        text.to_string()
    }
}

const ELLIPSIS: &str = "...";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("短文本", 10), "短文本");
        assert_eq!(truncate_text("一二三四五六七", 5), "一二...");
        assert_eq!(truncate_text("一二三四五六七", 5).chars().count(), 5);
    }
}
