//! 单步题目相关的数据结构

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// 入站解题请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizChainRequest {
    pub email: String,
    pub secret: String,
    #[serde(rename = "url")]
    pub start_url: String,
}

/// 内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Html,
    Pdf,
    Csv,
    Xlsx,
    Json,
    Unknown,
}

/// 文件扩展名到内容类型
static EXTENSION_TYPES: phf::Map<&'static str, ContentType> = phf::phf_map! {
    "html" => ContentType::Html,
    "htm" => ContentType::Html,
    "pdf" => ContentType::Pdf,
    "csv" => ContentType::Csv,
    "xlsx" => ContentType::Xlsx,
    "xls" => ContentType::Xlsx,
    "json" => ContentType::Json,
    "txt" => ContentType::Unknown,
};

impl ContentType {
    /// 按扩展名识别（忽略大小写）
    pub fn from_extension(ext: &str) -> Option<Self> {
        EXTENSION_TYPES.get(ext.to_ascii_lowercase().as_str()).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Html => "HTML",
            ContentType::Pdf => "PDF",
            ContentType::Csv => "CSV",
            ContentType::Xlsx => "XLSX",
            ContentType::Json => "JSON",
            ContentType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次抓取得到的原始页面
#[derive(Debug, Clone)]
pub struct QuizStep {
    pub url: String,
    pub raw_content: Vec<u8>,
    pub content_type: ContentType,
    /// 是否经过无头浏览器渲染
    pub rendered: bool,
}

impl QuizStep {
    pub fn new(url: impl Into<String>, raw_content: impl Into<Vec<u8>>, content_type: ContentType) -> Self {
        Self {
            url: url.into(),
            raw_content: raw_content.into(),
            content_type,
            rendered: false,
        }
    }
}

/// 表格中的一行，保持原始列顺序
pub type Row = Map<String, Value>;

/// 表格数据
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TabularData {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// 截断前的总行数
    pub total_rows: usize,
    pub truncated: bool,
}

impl TabularData {
    /// 按行数上限截断，返回是否发生了截断
    pub fn truncate_rows(&mut self, max_rows: usize) -> bool {
        if self.rows.len() > max_rows {
            self.rows.truncate(max_rows);
            self.truncated = true;
        }
        self.truncated
    }
}

/// 提取后的规范化内容
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedContent {
    pub question_text: String,
    pub supporting_text: String,
    pub tabular_data: Option<TabularData>,
    /// 在内容中发现的提交地址
    pub submit_url: Option<String>,
    /// 需要额外下载的数据文件
    pub data_links: Vec<String>,
    /// 截断、回退等处理记录
    pub notes: Vec<String>,
}

/// 答案值
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(Number),
    Boolean(bool),
    Text(String),
    Structured(Value),
}

impl AnswerValue {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Number(n) => AnswerValue::Number(n),
            Value::Bool(b) => AnswerValue::Boolean(b),
            Value::String(s) => AnswerValue::Text(s),
            other => AnswerValue::Structured(other),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AnswerValue::Number(n) => Value::Number(n.clone()),
            AnswerValue::Boolean(b) => Value::Bool(*b),
            AnswerValue::Text(s) => Value::String(s.clone()),
            AnswerValue::Structured(v) => v.clone(),
        }
    }

    /// 按答案格式转换
    pub fn coerce(self, format: AnswerFormat) -> Self {
        match (format, self) {
            (AnswerFormat::Number, AnswerValue::Text(s)) => {
                let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
                parse_number(&cleaned).map(AnswerValue::Number).unwrap_or(AnswerValue::Text(s))
            }
            (AnswerFormat::Boolean, AnswerValue::Text(s)) => {
                let lowered = s.trim().to_lowercase();
                AnswerValue::Boolean(matches!(lowered.as_str(), "true" | "1" | "yes" | "correct" | "y"))
            }
            (AnswerFormat::Boolean, AnswerValue::Number(n)) => {
                AnswerValue::Boolean(n.as_f64().map(|f| f != 0.0).unwrap_or(false))
            }
            (AnswerFormat::Object, AnswerValue::Text(s)) => match serde_json::from_str::<Value>(&s) {
                Ok(v @ (Value::Object(_) | Value::Array(_))) => AnswerValue::Structured(v),
                _ => AnswerValue::Structured(serde_json::json!({ "value": s })),
            },
            (AnswerFormat::String, AnswerValue::Text(s)) => AnswerValue::Text(s.trim().to_string()),
            (AnswerFormat::String, AnswerValue::Number(n)) => AnswerValue::Text(n.to_string()),
            (_, value) => value,
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Text(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

fn parse_number(s: &str) -> Option<Number> {
    if s.is_empty() {
        return None;
    }
    if !s.contains(['.', 'e', 'E']) {
        if let Ok(i) = s.parse::<i64>() {
            return Some(Number::from(i));
        }
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

/// 模型声明的答案格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    Number,
    #[default]
    String,
    Boolean,
    Object,
}

impl AnswerFormat {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "number" | "integer" | "float" | "numeric" => AnswerFormat::Number,
            "boolean" | "bool" => AnswerFormat::Boolean,
            "object" | "json" | "array" => AnswerFormat::Object,
            _ => AnswerFormat::String,
        }
    }
}

/// 下一步动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextAction {
    SubmitAndContinue,
    SubmitAndTerminate,
    Abstain,
}

impl NextAction {
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        match normalized.as_str() {
            "SUBMIT_AND_CONTINUE" | "CONTINUE" | "SUBMIT" => Some(NextAction::SubmitAndContinue),
            "SUBMIT_AND_TERMINATE" | "TERMINATE" | "SUBMIT_AND_STOP" | "FINISH" => Some(NextAction::SubmitAndTerminate),
            "ABSTAIN" | "GIVE_UP" | "SKIP" | "CANNOT_ANSWER" => Some(NextAction::Abstain),
            _ => None,
        }
    }
}

/// 模型给出的结构化答案
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonedAnswer {
    pub answer_value: AnswerValue,
    pub confidence_notes: Option<String>,
    pub next_action: NextAction,
    pub answer_format: AnswerFormat,
    /// 模型从题目中识别出的提交地址
    pub submit_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_uses_url_field() {
        let req: QuizChainRequest =
            serde_json::from_value(json!({"email": "a@b.c", "secret": "x", "url": "https://q/1"})).unwrap();
        assert_eq!(req.start_url, "https://q/1");
    }

    #[test]
    fn test_coerce_number() {
        let v = AnswerValue::Text("12,345".into()).coerce(AnswerFormat::Number);
        assert_eq!(v, AnswerValue::Number(Number::from(12345)));

        let v = AnswerValue::Text("3.5".into()).coerce(AnswerFormat::Number);
        assert_eq!(v.to_json(), json!(3.5));

        let v = AnswerValue::Text("n/a".into()).coerce(AnswerFormat::Number);
        assert_eq!(v, AnswerValue::Text("n/a".into()));
    }

    #[test]
    fn test_coerce_boolean_and_object() {
        assert_eq!(
            AnswerValue::Text("Yes".into()).coerce(AnswerFormat::Boolean),
            AnswerValue::Boolean(true)
        );
        assert_eq!(
            AnswerValue::Text("nope".into()).coerce(AnswerFormat::Boolean),
            AnswerValue::Boolean(false)
        );
        assert_eq!(
            AnswerValue::Text(r#"{"k": 1}"#.into()).coerce(AnswerFormat::Object).to_json(),
            json!({"k": 1})
        );
        assert_eq!(
            AnswerValue::Text("plain".into()).coerce(AnswerFormat::Object).to_json(),
            json!({"value": "plain"})
        );
    }

    #[test]
    fn test_next_action_parse_variants() {
        assert_eq!(NextAction::parse("submit_and_continue"), Some(NextAction::SubmitAndContinue));
        assert_eq!(NextAction::parse("Submit-And-Terminate"), Some(NextAction::SubmitAndTerminate));
        assert_eq!(NextAction::parse("ABSTAIN"), Some(NextAction::Abstain));
        assert_eq!(NextAction::parse("maybe"), None);
    }

    #[test]
    fn test_tabular_truncate_rows() {
        let mut table = TabularData {
            columns: vec!["a".into()],
            rows: (0..5)
                .map(|i| {
                    let mut row = Row::new();
                    row.insert("a".into(), json!(i));
                    row
                })
                .collect(),
            total_rows: 5,
            truncated: false,
        };
        assert!(table.truncate_rows(2));
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.total_rows, 5);
    }
}
