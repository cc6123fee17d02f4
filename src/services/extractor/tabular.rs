//! CSV / XLSX 提取策略

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde_json::{Number, Value};

use super::ExtractionStrategy;
use crate::error::ExtractError;
use crate::models::{ExtractedContent, QuizStep, Row, TabularData};

/// CSV：首行为表头，值一律按字符串保留
pub struct CsvStrategy;

impl ExtractionStrategy for CsvStrategy {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn extract(&self, step: &QuizStep) -> Result<ExtractedContent, ExtractError> {
        let text = String::from_utf8_lossy(&step.raw_content);
        let text = text.trim_start_matches('\u{feff}');

        // 开头以 # 起始的行当作题目提示
        let mut cues = Vec::new();
        let mut body_start = 0;
        for line in text.split_inclusive('\n') {
            let trimmed = line.trim();
            if let Some(cue) = trimmed.strip_prefix('#') {
                if !cue.trim().is_empty() {
                    cues.push(cue.trim().to_string());
                }
            } else if !trimmed.is_empty() {
                break;
            }
            body_start += line.len();
        }
        let body = text.get(body_start..).unwrap_or_default();

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| ExtractError::content(self.name(), format!("表头解析失败: {e}")))?
            .iter()
            .map(str::to_string)
            .collect();
        if header.iter().all(String::is_empty) {
            return Err(ExtractError::content(self.name(), "缺少表头"));
        }
        let columns = dedupe_columns(header);

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ExtractError::content(self.name(), format!("行解析失败: {e}")))?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            let row: Row = columns
                .iter()
                .enumerate()
                .map(|(i, col)| (col.clone(), Value::String(record.get(i).unwrap_or_default().to_string())))
                .collect();
            rows.push(row);
        }

        let table = TabularData {
            total_rows: rows.len(),
            columns,
            rows,
            truncated: false,
        };
        Ok(table_content("CSV", cues, table))
    }
}

/// XLSX：取第一个非空工作表，保留单元格类型
pub struct XlsxStrategy;

impl ExtractionStrategy for XlsxStrategy {
    fn name(&self) -> &'static str {
        "xlsx"
    }

    fn extract(&self, step: &QuizStep) -> Result<ExtractedContent, ExtractError> {
        let cursor = Cursor::new(step.raw_content.clone());
        let mut workbook = open_workbook_auto_from_rs(cursor)
            .map_err(|e| ExtractError::content(self.name(), format!("无法打开工作簿: {e}")))?;

        let sheet_names = workbook.sheet_names().to_vec();
        for sheet in sheet_names {
            let range = match workbook.worksheet_range(&sheet) {
                Ok(range) => range,
                Err(e) => {
                    tracing::debug!("工作表 {} 读取失败: {}", sheet, e);
                    continue;
                }
            };
            if range.is_empty() {
                continue;
            }

            let mut rows_iter = range.rows();
            let Some(header) = rows_iter.next() else {
                continue;
            };
            let columns = dedupe_columns(header.iter().map(cell_label).collect());

            let rows: Vec<Row> = rows_iter
                .filter(|cells| cells.iter().any(|c| !matches!(c, Data::Empty)))
                .map(|cells| {
                    columns
                        .iter()
                        .enumerate()
                        .map(|(i, col)| (col.clone(), cells.get(i).map(cell_value).unwrap_or(Value::Null)))
                        .collect()
                })
                .collect();

            let table = TabularData {
                total_rows: rows.len(),
                columns,
                rows,
                truncated: false,
            };
            let mut content = table_content("XLSX", Vec::new(), table);
            content.supporting_text = format!("Sheet: {sheet}\n{}", content.supporting_text);
            return Ok(content);
        }

        Err(ExtractError::content(self.name(), "工作簿中没有非空工作表"))
    }
}

fn cell_label(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::Int(i) => Value::Number(Number::from(*i)),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                Value::Number(Number::from(*f as i64))
            } else {
                Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
            }
        }
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    }
}

fn table_content(label: &str, cues: Vec<String>, table: TabularData) -> ExtractedContent {
    let question_text = if cues.is_empty() {
        format!(
            "The attached {label} data has {} rows with columns: {}. Use it to answer the quiz question.",
            table.total_rows,
            table.columns.join(", ")
        )
    } else {
        cues.join(" ")
    };

    ExtractedContent {
        question_text,
        supporting_text: format!(
            "{label} with {} rows and {} columns.",
            table.total_rows,
            table.columns.len()
        ),
        tabular_data: Some(table),
        ..Default::default()
    }
}

/// 列名去重：空列名记为 colN，重复列名追加序号
pub(crate) fn dedupe_columns(raw: Vec<String>) -> Vec<String> {
    let mut columns: Vec<String> = Vec::with_capacity(raw.len());
    for (idx, name) in raw.into_iter().enumerate() {
        let base = if name.trim().is_empty() {
            format!("col{}", idx + 1)
        } else {
            name.trim().to_string()
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while columns.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        columns.push(candidate);
    }
    columns
}

/// 把表格渲染成竖线分隔的文本
pub fn render_table_text(table: &TabularData, max_rows: usize) -> String {
    let mut lines = vec![table.columns.join(" | ")];
    for row in table.rows.iter().take(max_rows) {
        let cells: Vec<String> = table
            .columns
            .iter()
            .map(|col| match row.get(col) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        lines.push(cells.join(" | "));
    }
    let shown = table.rows.len().min(max_rows);
    if table.total_rows > shown {
        lines.push(format!("... ({} more rows)", table.total_rows - shown));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use serde_json::json;

    #[test]
    fn test_csv_cue_lines_become_question() {
        let body = "# What is the total of the amount column?\nname,amount\nx,10\ny,32\n";
        let step = QuizStep::new("https://x/data.csv", body.as_bytes().to_vec(), ContentType::Csv);
        let content = CsvStrategy.extract(&step).unwrap();
        assert_eq!(content.question_text, "What is the total of the amount column?");
        let table = content.tabular_data.unwrap();
        assert_eq!(table.columns, vec!["name", "amount"]);
        assert_eq!(table.rows[1]["amount"], json!("32"));
    }

    #[test]
    fn test_csv_ragged_rows_and_blank_header() {
        let body = "id,,id\n1,a\n2,b,c,extra\n";
        let step = QuizStep::new("https://x/d.csv", body.as_bytes().to_vec(), ContentType::Csv);
        let table = CsvStrategy.extract(&step).unwrap().tabular_data.unwrap();
        assert_eq!(table.columns, vec!["id", "col2", "id_2"]);
        assert_eq!(table.rows[0]["id_2"], json!(""));
        assert_eq!(table.rows[1]["id_2"], json!("c"));
    }

    #[test]
    fn test_xlsx_garbage_is_content_error() {
        let step = QuizStep::new("https://x/d.xlsx", b"not a workbook".to_vec(), ContentType::Xlsx);
        assert!(matches!(XlsxStrategy.extract(&step), Err(ExtractError::Content { .. })));
    }

    #[test]
    fn test_xlsx_skips_empty_sheet_and_keeps_cell_types() {
        let body = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/scores.xlsx"));
        let step = QuizStep::new("https://x/scores.xlsx", body.to_vec(), ContentType::Xlsx);
        let content = XlsxStrategy.extract(&step).unwrap();

        assert!(content.supporting_text.starts_with("Sheet: Scores\n"));
        assert!(content.question_text.contains("columns: name, score"));
        let table = content.tabular_data.unwrap();
        assert_eq!(table.columns, vec!["name", "score"]);
        assert_eq!(table.total_rows, 2);
        assert_eq!(table.rows[0]["name"], json!("alice"));
        assert_eq!(table.rows[0]["score"], json!(90));
        assert_eq!(table.rows[1]["score"], json!(75.5));
    }

    #[test]
    fn test_render_table_text_marks_hidden_rows() {
        let table = TabularData {
            columns: vec!["k".into(), "v".into()],
            rows: vec![
                serde_json::from_value(json!({"k": "a", "v": 1})).unwrap(),
                serde_json::from_value(json!({"k": "b", "v": null})).unwrap(),
            ],
            total_rows: 5,
            truncated: true,
        };
        let text = render_table_text(&table, 1);
        assert_eq!(text, "k | v\na | 1\n... (4 more rows)");
    }
}
