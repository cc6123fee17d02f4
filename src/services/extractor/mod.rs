//! 内容提取服务 - 业务能力层
//!
//! 每种内容类型对应一个有序的提取策略列表，依次尝试，第一个成功的结果生效。
//! 成功结果保证 `question_text` 非空，超长内容按上限截断并记录在 `notes` 中。

mod html;
mod json;
mod links;
mod pdf;
mod tabular;
mod text;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ExtractError;
use crate::models::{ContentType, ExtractedContent, QuizStep};
use crate::utils::logging::truncate_text;

pub use html::{HtmlPlainStrategy, HtmlStructuredStrategy};
pub(crate) use html::visible_text;
pub use json::JsonStrategy;
pub use links::{find_text_urls, resolve_url};
pub use pdf::{PdfObjectStrategy, PdfTextStrategy};
pub use tabular::{render_table_text, CsvStrategy, XlsxStrategy};
pub use text::Utf8TextStrategy;

/// 提取上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    pub max_table_rows: usize,
    pub max_text_chars: usize,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_table_rows: 100,
            max_text_chars: 3000,
        }
    }
}

impl ExtractionLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_table_rows: config.max_table_rows,
            max_text_chars: config.max_text_chars,
        }
    }
}

/// 单个提取策略
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, step: &QuizStep) -> Result<ExtractedContent, ExtractError>;
}

/// 内容提取器
///
/// 职责：
/// - 按内容类型分派到有序策略列表
/// - 保证成功结果带有题目文本
/// - 统一执行截断并记录
pub struct ContentExtractor {
    limits: ExtractionLimits,
    html: Vec<Box<dyn ExtractionStrategy>>,
    pdf: Vec<Box<dyn ExtractionStrategy>>,
    csv: Vec<Box<dyn ExtractionStrategy>>,
    xlsx: Vec<Box<dyn ExtractionStrategy>>,
    json: Vec<Box<dyn ExtractionStrategy>>,
    unknown: Vec<Box<dyn ExtractionStrategy>>,
}

impl ContentExtractor {
    pub fn new(limits: ExtractionLimits) -> Self {
        Self {
            limits,
            html: vec![Box::new(HtmlStructuredStrategy), Box::new(HtmlPlainStrategy)],
            pdf: vec![Box::new(PdfTextStrategy), Box::new(PdfObjectStrategy)],
            csv: vec![Box::new(CsvStrategy)],
            xlsx: vec![Box::new(XlsxStrategy)],
            json: vec![Box::new(JsonStrategy)],
            unknown: vec![Box::new(Utf8TextStrategy)],
        }
    }

    pub fn limits(&self) -> ExtractionLimits {
        self.limits
    }

    pub fn strategies_for(&self, content_type: ContentType) -> &[Box<dyn ExtractionStrategy>] {
        match content_type {
            ContentType::Html => &self.html,
            ContentType::Pdf => &self.pdf,
            ContentType::Csv => &self.csv,
            ContentType::Xlsx => &self.xlsx,
            ContentType::Json => &self.json,
            ContentType::Unknown => &self.unknown,
        }
    }

    /// 提取内容
    pub fn extract(&self, step: &QuizStep) -> Result<ExtractedContent, ExtractError> {
        let strategies = self.strategies_for(step.content_type);
        let mut last_error = None;

        for (idx, strategy) in strategies.iter().enumerate() {
            debug!("尝试提取策略 {} ({})", strategy.name(), step.content_type);
            match strategy.extract(step) {
                Ok(mut content) if !content.question_text.trim().is_empty() => {
                    if idx > 0 {
                        content
                            .notes
                            .push(format!("Primary extraction failed; used fallback strategy '{}'.", strategy.name()));
                    }
                    self.enforce_limits(&mut content);
                    return Ok(content);
                }
                Ok(_) => {
                    warn!("策略 {} 未找到题目文本", strategy.name());
                    last_error = Some(ExtractError::content(strategy.name(), "未找到题目文本"));
                }
                Err(e) => {
                    warn!("策略 {} 失败: {}", strategy.name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExtractError::Unsupported {
            content_type: step.content_type.to_string(),
            reason: "没有可用的提取策略".to_string(),
        }))
    }

    /// 在阻塞线程池中提取，PDF 与工作簿解析都是同步的 CPU 工作
    pub async fn spawn_extract(self: Arc<Self>, step: Arc<QuizStep>) -> Result<ExtractedContent, ExtractError> {
        let content_type = step.content_type;
        match tokio::task::spawn_blocking(move || self.extract(&step)).await {
            Ok(result) => result,
            Err(e) => {
                warn!("提取任务异常退出: {}", e);
                Err(ExtractError::content(
                    content_type.as_str(),
                    format!("提取任务异常退出: {e}"),
                ))
            }
        }
    }

    fn enforce_limits(&self, content: &mut ExtractedContent) {
        let max_chars = self.limits.max_text_chars;

        let total = content.question_text.chars().count();
        if total > max_chars {
            content.question_text = truncate_text(&content.question_text, max_chars);
            content
                .notes
                .push(format!("Question text truncated to {max_chars} of {total} characters."));
        }

        let total = content.supporting_text.chars().count();
        if total > max_chars {
            content.supporting_text = truncate_text(&content.supporting_text, max_chars);
            content
                .notes
                .push(format!("Supporting text truncated to {max_chars} of {total} characters."));
        }

        if let Some(table) = content.tabular_data.as_mut() {
            if table.truncate_rows(self.limits.max_table_rows) {
                content.notes.push(format!(
                    "Table truncated: showing {} of {} rows.",
                    table.rows.len(),
                    table.total_rows
                ));
            }
        }
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new(ExtractionLimits::default())
    }
}

/// 把附件内容合并进主内容
///
/// 主内容没有表格时直接采用附件的表格，否则把附件表格渲染成文本。
pub fn merge_attachment(
    content: &mut ExtractedContent,
    url: &str,
    attachment: ExtractedContent,
    limits: ExtractionLimits,
) {
    let mut section = format!("\n\n=== Attachment: {url} ===\n");
    if !attachment.supporting_text.is_empty() {
        section.push_str(&attachment.supporting_text);
    } else {
        section.push_str(&attachment.question_text);
    }

    match (&content.tabular_data, attachment.tabular_data) {
        (None, Some(table)) => content.tabular_data = Some(table),
        (Some(_), Some(table)) => {
            section.push('\n');
            section.push_str(&render_table_text(&table, limits.max_table_rows));
        }
        (_, None) => {}
    }

    let room = limits.max_text_chars.saturating_sub(content.supporting_text.chars().count());
    let section_len = section.chars().count();
    if section_len > room {
        section = truncate_text(&section, room);
        content
            .notes
            .push(format!("Attachment {url} truncated to {room} of {section_len} characters."));
    }
    content.supporting_text.push_str(&section);
    content.notes.extend(attachment.notes);
}

/// 从一段文本中挑出题目：优先含问号的行，否则取第一段
pub(crate) fn pick_question(text: &str) -> String {
    if let Some(line) = text.lines().map(str::trim).find(|l| l.contains('?') && l.chars().count() > 3) {
        return line.to_string();
    }

    let mut paragraph = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(line);
    }
    paragraph.join(" ")
}

/// 合并连续空白
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn step(body: &str, content_type: ContentType) -> QuizStep {
        QuizStep::new("https://quiz.example.com/q/1", body.as_bytes().to_vec(), content_type)
    }

    #[test]
    fn test_csv_header_and_row_in_column_order() {
        let extractor = ContentExtractor::default();
        let content = extractor.extract(&step("a,b,c\n1,2,3\n", ContentType::Csv)).unwrap();
        let table = content.tabular_data.expect("应该有表格");
        assert_eq!(table.columns, vec!["a", "b", "c"]);
        assert_eq!(table.rows.len(), 1);
        let keys: Vec<&String> = table.rows[0].keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(table.rows[0]["a"], "1");
        assert_eq!(table.rows[0]["c"], "3");
        assert!(!content.question_text.is_empty());
    }

    #[test]
    fn test_html_without_question_fails_with_content_error() {
        let extractor = ContentExtractor::default();
        let err = extractor
            .extract(&step(
                "<html><head><title></title></head><body><script>var x = 1;</script></body></html>",
                ContentType::Html,
            ))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContentExtractionError);
    }

    #[test]
    fn test_unknown_binary_is_unsupported() {
        let extractor = ContentExtractor::default();
        let bytes = vec![0xff, 0xfe, 0x00, 0x81, 0x9f];
        let err = extractor
            .extract(&QuizStep::new("https://x/blob", bytes, ContentType::Unknown))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedContentError);
    }

    #[test]
    fn test_large_table_truncated_and_recorded() {
        let extractor = ContentExtractor::new(ExtractionLimits {
            max_table_rows: 10,
            max_text_chars: 3000,
        });
        let mut csv = String::from("id,value\n");
        for i in 0..50 {
            csv.push_str(&format!("{i},{}\n", i * 2));
        }
        let content = extractor.extract(&step(&csv, ContentType::Csv)).unwrap();
        let table = content.tabular_data.unwrap();
        assert_eq!(table.rows.len(), 10);
        assert_eq!(table.total_rows, 50);
        assert!(table.truncated);
        assert!(content.notes.iter().any(|n| n.contains("10 of 50")));
    }

    #[test]
    fn test_long_text_truncated_and_recorded() {
        let extractor = ContentExtractor::new(ExtractionLimits {
            max_table_rows: 10,
            max_text_chars: 50,
        });
        let body = format!("What is the answer?\n{}", "x".repeat(500));
        let content = extractor.extract(&step(&body, ContentType::Unknown)).unwrap();
        assert!(content.supporting_text.chars().count() <= 50);
        assert!(content.notes.iter().any(|n| n.starts_with("Supporting text truncated")));
    }

    #[test]
    fn test_html_falls_back_to_plain_strategy_note() {
        // 结构化策略拿不到文本时（例如正文只有数据表），回退策略仍能取到文字
        let extractor = ContentExtractor::default();
        let html = "<html><body><table><tr><th>q</th></tr><tr><td>What is 2+2?</td></tr></table></body></html>";
        let content = extractor.extract(&step(html, ContentType::Html)).unwrap();
        assert!(content.question_text.contains("2+2"));
        assert!(content.notes.iter().any(|n| n.contains("html-plain")));
    }

    #[test]
    fn test_merge_attachment_adopts_table() {
        let extractor = ContentExtractor::default();
        let mut main = extractor
            .extract(&step(
                "<html><body><div id=\"result\">Sum the value column of the CSV.</div></body></html>",
                ContentType::Html,
            ))
            .unwrap();
        let attachment = extractor.extract(&step("value\n1\n2\n", ContentType::Csv)).unwrap();
        merge_attachment(&mut main, "https://x/data.csv", attachment, extractor.limits());
        assert_eq!(main.tabular_data.as_ref().unwrap().rows.len(), 2);
        assert!(main.supporting_text.contains("Attachment: https://x/data.csv"));
    }

    #[tokio::test]
    async fn test_spawn_extract_matches_inline_extract() {
        let extractor = Arc::new(ContentExtractor::default());
        let step = Arc::new(step("a,b\n1,2\n", ContentType::Csv));
        let inline = extractor.extract(&step).unwrap();
        let pooled = extractor.clone().spawn_extract(step).await.unwrap();
        assert_eq!(inline, pooled);
    }

    #[test]
    fn test_pick_question() {
        assert_eq!(pick_question("Intro\n\nWhat is 1+1?\nmore"), "What is 1+1?");
        assert_eq!(pick_question("\n\nFirst line\nsecond line\n\nthird"), "First line second line");
    }
}
