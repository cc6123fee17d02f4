//! 答案推理服务 - 业务能力层
//!
//! 把提取出的内容组织成一段提示词，调用一次模型，从回复中解析出结构化答案。
//! 模型的自由文本只在这里出现，外部只看到 `ReasonedAnswer`。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ReasonError;
use crate::models::{AnswerFormat, AnswerValue, ExtractedContent, NextAction, ReasonedAnswer};
use crate::services::extractor::render_table_text;
use crate::services::llm_service::Completer;
use crate::utils::logging::truncate_text;

/// 提示词中最多展示的表格行数
const PROMPT_TABLE_ROWS: usize = 50;

/// 解析失败时错误信息里保留的回复长度
const EXCERPT_CHARS: usize = 200;

#[async_trait]
pub trait Reasoner: Send + Sync {
    /// 对一道题给出答案。只调用一次模型，不重试
    async fn reason(
        &self,
        page_url: &str,
        content: &ExtractedContent,
        timeout: Duration,
    ) -> Result<ReasonedAnswer, ReasonError>;
}

/// 基于 LLM 的推理器
pub struct AnswerReasoner {
    completer: Arc<dyn Completer>,
}

impl AnswerReasoner {
    pub fn new(completer: Arc<dyn Completer>) -> Self {
        Self { completer }
    }
}

#[async_trait]
impl Reasoner for AnswerReasoner {
    async fn reason(
        &self,
        page_url: &str,
        content: &ExtractedContent,
        timeout: Duration,
    ) -> Result<ReasonedAnswer, ReasonError> {
        let prompt = build_prompt(page_url, content);
        debug!("🤖 提示词 {} 字符，超时 {:?}", prompt.chars().count(), timeout);

        let reply = tokio::time::timeout(timeout, self.completer.complete(&prompt))
            .await
            .map_err(|_| ReasonError::Timeout { after: timeout })??;

        debug!("模型回复: {}", truncate_text(&reply, EXCERPT_CHARS));
        parse_answer(&reply)
    }
}

/// 构造提示词
pub fn build_prompt(page_url: &str, content: &ExtractedContent) -> String {
    let mut prompt = String::new();
    prompt.push_str("Solve the quiz question below.\n\n");
    prompt.push_str(&format!("Quiz page URL: {page_url}\n\n"));
    prompt.push_str("## Question\n");
    prompt.push_str(&content.question_text);
    prompt.push_str("\n\n");

    if !content.supporting_text.trim().is_empty() {
        prompt.push_str("## Supporting material\n");
        prompt.push_str(&content.supporting_text);
        prompt.push_str("\n\n");
    }

    if let Some(table) = &content.tabular_data {
        prompt.push_str(&format!(
            "## Data table ({} rows total, columns: {})\n",
            table.total_rows,
            table.columns.join(", ")
        ));
        prompt.push_str(&render_table_text(table, PROMPT_TABLE_ROWS));
        prompt.push_str("\n\n");
    }

    if let Some(submit_url) = &content.submit_url {
        prompt.push_str(&format!("Submission endpoint found on the page: {submit_url}\n\n"));
    }

    if !content.notes.is_empty() {
        prompt.push_str("## Processing notes\n");
        for note in &content.notes {
            prompt.push_str(&format!("- {note}\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        r#"## Response format
Reply with exactly one JSON object and nothing else:
{
  "answer": <the answer: number, string, boolean, or JSON object>,
  "answer_format": "number" | "string" | "boolean" | "object",
  "submit_url": "<the URL the answer must be POSTed to, as stated in the question, or null>",
  "next_action": "SUBMIT_AND_CONTINUE" | "SUBMIT_AND_TERMINATE" | "ABSTAIN",
  "confidence_notes": "<one short sentence on how sure you are>"
}
Use SUBMIT_AND_TERMINATE only when the question says this is the last one.
Use ABSTAIN only when the material does not contain enough information to answer."#,
    );
    prompt
}

/// 从模型回复中解析答案
///
/// 依次尝试每个 `{` 开始的位置，取第一个带 `answer` 或 `next_action` 字段的 JSON 对象，
/// 前后的说明文字和代码块标记都会被忽略。
pub fn parse_answer(reply: &str) -> Result<ReasonedAnswer, ReasonError> {
    let object = find_answer_object(reply).ok_or_else(|| parse_error("回复中没有包含 answer 的 JSON 对象", reply))?;

    let next_action = match object.get("next_action") {
        Some(Value::String(s)) => {
            NextAction::parse(s).ok_or_else(|| parse_error(&format!("未知的 next_action: {s}"), reply))?
        }
        Some(Value::Null) | None => NextAction::SubmitAndContinue,
        Some(other) => return Err(parse_error(&format!("next_action 类型错误: {other}"), reply)),
    };

    let raw_answer = object.get("answer").cloned().unwrap_or(Value::Null);
    if raw_answer.is_null() && next_action != NextAction::Abstain {
        return Err(parse_error("缺少 answer 字段", reply));
    }

    let answer_format = match object.get("answer_format").and_then(Value::as_str) {
        Some(format) => AnswerFormat::parse(format),
        None => infer_format(&raw_answer),
    };

    let answer_value = AnswerValue::from_json(raw_answer).coerce(answer_format);

    Ok(ReasonedAnswer {
        answer_value,
        confidence_notes: non_empty_str(&object, "confidence_notes"),
        next_action,
        answer_format,
        submit_url: non_empty_str(&object, "submit_url"),
    })
}

fn find_answer_object(reply: &str) -> Option<Map<String, Value>> {
    for (idx, _) in reply.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&reply[idx..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next() {
            if map.contains_key("answer") || map.contains_key("next_action") {
                return Some(map);
            }
        }
    }
    None
}

fn infer_format(value: &Value) -> AnswerFormat {
    match value {
        Value::Number(_) => AnswerFormat::Number,
        Value::Bool(_) => AnswerFormat::Boolean,
        Value::Object(_) | Value::Array(_) => AnswerFormat::Object,
        _ => AnswerFormat::String,
    }
}

fn non_empty_str(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

fn parse_error(reason: &str, reply: &str) -> ReasonError {
    warn!("⚠️ 模型答案解析失败: {}", reason);
    ReasonError::Parse {
        reason: reason.to_string(),
        excerpt: truncate_text(reply, EXCERPT_CHARS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use crate::models::TabularData;
    use crate::services::llm_service::MockCompleter;
    use serde_json::json;

    const BLOCK: &str = r#"{"answer": 12345, "answer_format": "number", "submit_url": "https://quiz.example.com/submit", "next_action": "SUBMIT_AND_CONTINUE", "confidence_notes": "summed the column"}"#;

    #[test]
    fn test_prose_wrapped_block_parses_like_bare_block() {
        let bare = parse_answer(BLOCK).unwrap();
        let wrapped = parse_answer(&format!(
            "Let me think. The set {{1, 2}} is irrelevant.\n```json\n{BLOCK}\n```\nHope that helps!"
        ))
        .unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare.answer_value.to_json(), json!(12345));
        assert_eq!(bare.submit_url.as_deref(), Some("https://quiz.example.com/submit"));
        assert_eq!(bare.next_action, NextAction::SubmitAndContinue);
    }

    #[test]
    fn test_answer_coerced_by_format() {
        let parsed = parse_answer(r#"{"answer": "1,234", "answer_format": "number"}"#).unwrap();
        assert_eq!(parsed.answer_value.to_json(), json!(1234));

        let parsed = parse_answer(r#"{"answer": "yes", "answer_format": "boolean", "next_action": "submit_and_terminate"}"#).unwrap();
        assert_eq!(parsed.answer_value, AnswerValue::Boolean(true));
        assert_eq!(parsed.next_action, NextAction::SubmitAndTerminate);
    }

    #[test]
    fn test_abstain_without_answer() {
        let parsed = parse_answer(r#"{"next_action": "ABSTAIN", "confidence_notes": "table is empty"}"#).unwrap();
        assert_eq!(parsed.next_action, NextAction::Abstain);
        assert_eq!(parsed.confidence_notes.as_deref(), Some("table is empty"));
    }

    #[test]
    fn test_unparseable_reply() {
        let err = parse_answer("I think the answer is 42.").unwrap_err();
        assert!(matches!(err, ReasonError::Parse { .. }));

        let err = parse_answer(r#"{"unrelated": true}"#).unwrap_err();
        assert!(matches!(err, ReasonError::Parse { .. }));

        let err = parse_answer(r#"{"answer": 1, "next_action": "PONDER"}"#).unwrap_err();
        assert!(matches!(err, ReasonError::Parse { .. }));
    }

    #[test]
    fn test_prompt_contains_material_and_notes() {
        let content = ExtractedContent {
            question_text: "What is the total?".into(),
            supporting_text: "Sales for March.".into(),
            tabular_data: Some(TabularData {
                columns: vec!["amount".into()],
                rows: vec![serde_json::from_value(json!({"amount": "5"})).unwrap()],
                total_rows: 1,
                truncated: false,
            }),
            submit_url: Some("https://quiz.example.com/submit".into()),
            data_links: vec![],
            notes: vec!["Table truncated: showing 1 of 9 rows.".into()],
        };
        let prompt = build_prompt("https://quiz.example.com/q/7", &content);
        assert!(prompt.contains("Quiz page URL: https://quiz.example.com/q/7"));
        assert!(prompt.contains("What is the total?"));
        assert!(prompt.contains("amount\n5"));
        assert!(prompt.contains("Table truncated"));
        assert!(prompt.contains("\"next_action\""));
    }

    #[tokio::test]
    async fn test_reason_calls_model_once() {
        let mut completer = MockCompleter::new();
        completer
            .expect_complete()
            .times(1)
            .returning(|_| Ok(format!("Here you go:\n{BLOCK}")));

        let reasoner = AnswerReasoner::new(Arc::new(completer));
        let content = ExtractedContent {
            question_text: "Sum?".into(),
            ..Default::default()
        };
        let answer = reasoner
            .reason("https://quiz.example.com/q/1", &content, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(answer.answer_format, AnswerFormat::Number);
    }

    #[tokio::test]
    async fn test_provider_error_is_passed_through() {
        let mut completer = MockCompleter::new();
        completer.expect_complete().times(1).returning(|_| {
            Err(CompletionError::Api {
                model: "m".into(),
                message: "503".into(),
            })
        });

        let reasoner = AnswerReasoner::new(Arc::new(completer));
        let err = reasoner
            .reason("https://q/1", &ExtractedContent::default(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ReasonError::Completion(CompletionError::Api { .. })));
    }

    struct SlowCompleter;

    #[async_trait]
    impl Completer for SlowCompleter {
        async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(BLOCK.to_string())
        }
    }

    #[tokio::test]
    async fn test_slow_model_times_out() {
        let reasoner = AnswerReasoner::new(Arc::new(SlowCompleter));
        let err = reasoner
            .reason("https://q/1", &ExtractedContent::default(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReasonError::Timeout {
                after: Duration::from_millis(50)
            }
        );
    }
}
