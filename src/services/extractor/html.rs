//! HTML 提取策略

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;

use super::links::{discover, resolve_url};
use super::tabular::{dedupe_columns, render_table_text};
use super::{collapse_whitespace, ExtractionStrategy};
use crate::error::ExtractError;
use crate::models::{ExtractedContent, QuizStep, Row, TabularData};

/// 依次尝试的正文容器
const MAIN_BLOCK_SELECTORS: &[&str] = &["#result", "main", "article", "[role=main]", "body"];

/// 不计入可见文本的元素
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// 基于 DOM 的提取
pub struct HtmlStructuredStrategy;

impl ExtractionStrategy for HtmlStructuredStrategy {
    fn name(&self) -> &'static str {
        "html-structured"
    }

    fn extract(&self, step: &QuizStep) -> Result<ExtractedContent, ExtractError> {
        let html = String::from_utf8_lossy(&step.raw_content);
        let document = Html::parse_document(&html);

        // 有数据行的表格进入结构化数据；只有一行的排版表格当作正文
        let mut data_tables = Vec::new();
        if let Ok(sel) = Selector::parse("table") {
            for table in document.select(&sel) {
                if let Some(parsed) = parse_table(table) {
                    data_tables.push((table.id(), parsed));
                }
            }
        }
        let data_table_ids: Vec<_> = data_tables.iter().map(|(id, _)| *id).collect();

        let question_text = MAIN_BLOCK_SELECTORS
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .filter_map(|sel| document.select(&sel).next())
            .map(|el| text_outside(el, |skipped| data_table_ids.contains(&skipped.id())))
            .find(|text| !text.is_empty())
            .ok_or_else(|| ExtractError::content(self.name(), "页面中没有可识别的题目文本"))?;

        // 第一个数据表作为结构化数据，其余渲染成文本
        let mut tables = data_tables.into_iter().map(|(_, table)| table);
        let tabular_data = tables.next();

        let mut hrefs = Vec::new();
        let mut link_lines = Vec::new();
        if let Ok(sel) = Selector::parse("a[href]") {
            for anchor in document.select(&sel) {
                let Some(href) = anchor.value().attr("href") else {
                    continue;
                };
                if let Some(absolute) = resolve_url(&step.url, href) {
                    let label = collapse_whitespace(&anchor.text().collect::<String>());
                    link_lines.push(format!("- {} -> {}", if label.is_empty() { "(link)" } else { label.as_str() }, absolute));
                    hrefs.push(absolute);
                }
            }
        }

        let mut supporting = Vec::new();
        if let Some(title) = page_title(&document) {
            supporting.push(format!("Page title: {title}"));
        }
        if !link_lines.is_empty() {
            supporting.push(format!("Links:\n{}", link_lines.join("\n")));
        }
        for (idx, table) in tables.enumerate() {
            supporting.push(format!("Additional table {}:\n{}", idx + 2, render_table_text(&table, table.rows.len())));
        }

        let found = discover(&step.url, &hrefs, &question_text);

        Ok(ExtractedContent {
            question_text,
            supporting_text: supporting.join("\n\n"),
            tabular_data,
            submit_url: found.submit_url,
            data_links: found.data_links,
            notes: Vec::new(),
        })
    }
}

/// 基于正则去标签的回退提取
pub struct HtmlPlainStrategy;

impl ExtractionStrategy for HtmlPlainStrategy {
    fn name(&self) -> &'static str {
        "html-plain"
    }

    fn extract(&self, step: &QuizStep) -> Result<ExtractedContent, ExtractError> {
        let html = String::from_utf8_lossy(&step.raw_content);
        let text = strip_tags(&html);
        if text.is_empty() {
            return Err(ExtractError::content(self.name(), "去除标签后没有文本"));
        }

        let found = discover(&step.url, &[], &text);
        Ok(ExtractedContent {
            question_text: text,
            submit_url: found.submit_url,
            data_links: found.data_links,
            ..Default::default()
        })
    }
}

/// 元素内的可见文本，跳过脚本和样式
pub(crate) fn visible_text(root: ElementRef<'_>) -> String {
    text_outside(root, |_| false)
}

/// 可见文本，另外跳过 `skip` 命中的元素及其子树
fn text_outside<F>(root: ElementRef<'_>, skip: F) -> String
where
    F: Fn(ElementRef<'_>) -> bool,
{
    let mut parts = Vec::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| match ElementRef::wrap(ancestor) {
            Some(el) => HIDDEN_ELEMENTS.contains(&el.value().name()) || skip(el),
            None => false,
        });
        if !hidden {
            parts.push(&**text);
        }
    }
    collapse_whitespace(&parts.join(" "))
}

fn page_title(document: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    let title = collapse_whitespace(&document.select(&sel).next()?.text().collect::<String>());
    (!title.is_empty()).then_some(title)
}

/// 解析表格：有 `th` 的首行作表头，否则首行即表头
fn parse_table(table: ElementRef<'_>) -> Option<TabularData> {
    let row_sel = Selector::parse("tr").ok()?;
    let cell_sel = Selector::parse("th, td").ok()?;

    let mut rows = table.select(&row_sel).map(|tr| {
        tr.select(&cell_sel)
            .map(|cell| collapse_whitespace(&cell.text().collect::<String>()))
            .collect::<Vec<_>>()
    });

    let header = rows.next()?;
    if header.is_empty() {
        return None;
    }
    let columns = dedupe_columns(header);

    let data: Vec<Row> = rows
        .filter(|cells| cells.iter().any(|c| !c.is_empty()))
        .map(|cells| {
            columns
                .iter()
                .enumerate()
                .map(|(i, col)| (col.clone(), Value::String(cells.get(i).cloned().unwrap_or_default())))
                .collect()
        })
        .collect();

    if data.is_empty() {
        return None;
    }
    Some(TabularData {
        total_rows: data.len(),
        columns,
        rows: data,
        truncated: false,
    })
}

/// 正则去标签，并还原常见实体
pub(crate) fn strip_tags(html: &str) -> String {
    let mut text = html.to_string();
    for pattern in [
        r"(?is)<script\b.*?</script>",
        r"(?is)<style\b.*?</style>",
        r"(?is)<noscript\b.*?</noscript>",
        r"(?is)<head\b.*?</head>",
        r"(?s)<!--.*?-->",
        r"(?s)<[^>]+>",
    ] {
        if let Ok(re) = Regex::new(pattern) {
            text = re.replace_all(&text, " ").into_owned();
        }
    }
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    collapse_whitespace(&text)
}
