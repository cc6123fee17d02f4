//! JSON 提取策略

use serde_json::Value;

use super::links::discover;
use super::tabular::dedupe_columns;
use super::ExtractionStrategy;
use crate::error::ExtractError;
use crate::models::{ExtractedContent, QuizStep, Row, TabularData};

/// 可能承载题目的字段，按优先级排列
const QUESTION_KEYS: &[&str] = &["question", "task", "prompt", "instructions", "title"];

pub struct JsonStrategy;

impl ExtractionStrategy for JsonStrategy {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extract(&self, step: &QuizStep) -> Result<ExtractedContent, ExtractError> {
        let value: Value = serde_json::from_slice(&step.raw_content)
            .map_err(|e| ExtractError::content(self.name(), format!("JSON 解析失败: {e}")))?;

        let pretty = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        let tabular_data = find_records(&value).and_then(records_to_table);

        let question_text = value
            .as_object()
            .and_then(|obj| {
                QUESTION_KEYS
                    .iter()
                    .filter_map(|key| obj.get(*key).and_then(Value::as_str))
                    .map(str::trim)
                    .find(|s| !s.is_empty())
            })
            .map(str::to_string)
            .unwrap_or_else(|| match &tabular_data {
                Some(table) => format!(
                    "The attached JSON data has {} records with fields: {}. Use it to answer the quiz question.",
                    table.total_rows,
                    table.columns.join(", ")
                ),
                None => "The attached JSON document is shown below. Use it to answer the quiz question.".to_string(),
            });

        let found = discover(&step.url, &[], &pretty);
        Ok(ExtractedContent {
            question_text,
            supporting_text: pretty,
            tabular_data,
            submit_url: found.submit_url,
            data_links: found.data_links,
            notes: Vec::new(),
        })
    }
}

/// 顶层对象数组，或顶层对象中第一个对象数组字段
fn find_records(value: &Value) -> Option<&Vec<Value>> {
    let is_records = |items: &Vec<Value>| !items.is_empty() && items.iter().all(Value::is_object);
    match value {
        Value::Array(items) if is_records(items) => Some(items),
        Value::Object(obj) => obj.values().find_map(|v| match v {
            Value::Array(items) if is_records(items) => Some(items),
            _ => None,
        }),
        _ => None,
    }
}

fn records_to_table(items: &Vec<Value>) -> Option<TabularData> {
    let mut raw_columns: Vec<String> = Vec::new();
    for item in items {
        if let Value::Object(obj) = item {
            for key in obj.keys() {
                if !raw_columns.contains(key) {
                    raw_columns.push(key.clone());
                }
            }
        }
    }
    if raw_columns.is_empty() {
        return None;
    }
    let columns = dedupe_columns(raw_columns.clone());

    let rows: Vec<Row> = items
        .iter()
        .filter_map(Value::as_object)
        .map(|obj| {
            raw_columns
                .iter()
                .zip(&columns)
                .map(|(raw, col)| (col.clone(), obj.get(raw).cloned().unwrap_or(Value::Null)))
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
