//! PDF 提取策略

use std::panic::{self, AssertUnwindSafe};

use lopdf::Document;
use regex::Regex;
use serde_json::Value;

use super::links::discover;
use super::tabular::dedupe_columns;
use super::{pick_question, ExtractionStrategy};
use crate::error::ExtractError;
use crate::models::{ExtractedContent, QuizStep, Row, TabularData};

/// 少于这么多非空白字符视为没有文字层
const MIN_TEXT_CHARS: usize = 20;

/// 整篇文字提取
pub struct PdfTextStrategy;

impl ExtractionStrategy for PdfTextStrategy {
    fn name(&self) -> &'static str {
        "pdf-text"
    }

    fn extract(&self, step: &QuizStep) -> Result<ExtractedContent, ExtractError> {
        let bytes = step.raw_content.as_slice();
        // pdf-extract 遇到畸形文件可能 panic
        let text = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)))
            .map_err(|_| ExtractError::content(self.name(), "解析 PDF 时发生 panic"))?
            .map_err(|e| ExtractError::content(self.name(), format!("文字提取失败: {e}")))?;

        build_content(self.name(), &step.url, text)
    }
}

/// 按页遍历对象树提取
pub struct PdfObjectStrategy;

impl ExtractionStrategy for PdfObjectStrategy {
    fn name(&self) -> &'static str {
        "pdf-objects"
    }

    fn extract(&self, step: &QuizStep) -> Result<ExtractedContent, ExtractError> {
        let doc = Document::load_mem(&step.raw_content)
            .map_err(|e| ExtractError::content(self.name(), format!("无法加载 PDF: {e}")))?;

        let mut sections = Vec::new();
        for page in doc.get_pages().keys() {
            match doc.extract_text(&[*page]) {
                Ok(text) if !text.trim().is_empty() => {
                    sections.push(format!("=== Page {page} ===\n{}", text.trim()));
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("第 {} 页提取失败: {}", page, e),
            }
        }

        build_content(self.name(), &step.url, sections.join("\n\n"))
    }
}

fn build_content(strategy: &'static str, url: &str, text: String) -> Result<ExtractedContent, ExtractError> {
    let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
    if meaningful < MIN_TEXT_CHARS {
        return Err(ExtractError::content(
            strategy,
            format!("文字过少（{meaningful} 个字符），可能是扫描件"),
        ));
    }

    let question_text = pick_question(&text);
    let found = discover(url, &[], &text);
    let tabular_data = detect_text_table(&text);
    if let Some(table) = &tabular_data {
        tracing::debug!("识别到文本表格: {} 列 {} 行", table.columns.len(), table.total_rows);
    }
    Ok(ExtractedContent {
        question_text,
        supporting_text: text,
        tabular_data,
        submit_url: found.submit_url,
        data_links: found.data_links,
        ..Default::default()
    })
}

/// 在文字层里找表格：连续若干行列数一致，表头之后的每一行都带数字
///
/// 有竖线的行按竖线切分，有两个以上连续空格或制表符的按空隙切分，否则按单个空白切分。
/// 取最长的一段，首行作表头。
pub(crate) fn detect_text_table(text: &str) -> Option<TabularData> {
    let gap = Regex::new(r"\t|\s{2,}").ok()?;
    let lines: Vec<Vec<String>> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| split_cells(line, &gap))
        .filter(|cells| !is_separator_row(cells))
        .collect();

    // (表头行, 结束行)
    let mut best: Option<(usize, usize)> = None;
    let mut start = 0;
    while start < lines.len() {
        let width = lines[start].len();
        let mut end = start + 1;
        while end < lines.len() && lines[end].len() == width {
            end += 1;
        }

        if width >= 2 {
            // 从末尾往前收集带数字的行，紧挨着的上一行当表头
            let mut first_data = end;
            while first_data > start + 1 && lines[first_data - 1].iter().any(|c| is_numeric(c)) {
                first_data -= 1;
            }
            let header = first_data - 1;
            let len = end - header;
            if first_data < end && best.map_or(true, |(h, e)| len > e - h) {
                best = Some((header, end));
            }
        }
        start = end;
    }

    let (header, end) = best?;
    let columns = dedupe_columns(lines[header].clone());
    let rows: Vec<Row> = lines[header + 1..end]
        .iter()
        .map(|cells| {
            columns
                .iter()
                .cloned()
                .zip(cells.iter().map(|c| Value::String(c.clone())))
                .collect()
        })
        .collect();

    Some(TabularData {
        total_rows: rows.len(),
        columns,
        rows,
        truncated: false,
    })
}

fn split_cells(line: &str, gap: &Regex) -> Vec<String> {
    if line.contains('|') {
        let trimmed = line.strip_prefix('|').unwrap_or(line);
        let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);
        return trimmed.split('|').map(|c| c.trim().to_string()).collect();
    }
    if gap.is_match(line) {
        return gap.split(line).map(str::to_string).collect();
    }
    line.split_whitespace().map(str::to_string).collect()
}

/// Markdown 表格的 `|---|:--:|` 分隔行
fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells
            .iter()
            .all(|c| !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | '=')))
}

fn is_numeric(cell: &str) -> bool {
    let cleaned: String = cell
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '%' | '€' | '£'))
        .collect();
    !cleaned.is_empty() && cleaned.parse::<f64>().is_ok()
}
