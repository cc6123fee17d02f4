//! 链接发现：提交地址与数据文件

use regex::Regex;
use url::Url;

use crate::models::ContentType;

/// 把相对链接解析为绝对地址
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
        return None;
    }
    match Url::parse(href) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Url::parse(base).ok()?.join(href).ok().map(|u| u.to_string()),
    }
}

/// 找出文本中出现的 http(s) 地址
pub fn find_text_urls(text: &str) -> Vec<String> {
    let mut urls = Vec::new();
    if let Ok(re) = Regex::new(r#"https?://[^\s<>"'{}|\\^`\[\]]+"#) {
        for m in re.find_iter(text) {
            let url = m.as_str().trim_end_matches(['.', ',', ';', ':', ')', '!', '?']);
            if !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
    }
    urls
}

/// 文本中以 `/` 开头、包含 submit 的相对路径
fn find_relative_submit_paths(text: &str) -> Vec<String> {
    let mut paths = Vec::new();
    if let Ok(re) = Regex::new(r#"(?:^|[\s"'(])(/[\w\-./]*submit[\w\-./]*)"#) {
        for cap in re.captures_iter(text) {
            if let Some(m) = cap.get(1) {
                paths.push(m.as_str().trim_end_matches(['.', ',']).to_string());
            }
        }
    }
    paths
}

pub(crate) fn is_submit_like(url: &str) -> bool {
    let lowered = url.to_lowercase();
    lowered.contains("submit") || lowered.contains("/answer")
}

/// 根据 URL 路径的扩展名判断是否是数据文件
pub(crate) fn data_link_type(url: &str) -> Option<ContentType> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    let ext = path.rsplit_once('.')?.1;
    match ContentType::from_extension(ext)? {
        ContentType::Html | ContentType::Unknown => None,
        data => Some(data),
    }
}

/// 发现结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct DiscoveredLinks {
    pub submit_url: Option<String>,
    pub data_links: Vec<String>,
}

/// 从候选链接（已解析为绝对地址）和正文中发现提交地址与数据文件
pub(crate) fn discover(base: &str, hrefs: &[String], text: &str) -> DiscoveredLinks {
    let mut found = DiscoveredLinks::default();

    let mut candidates: Vec<String> = hrefs.to_vec();
    candidates.extend(find_text_urls(text));
    candidates.extend(
        find_relative_submit_paths(text)
            .iter()
            .filter_map(|p| resolve_url(base, p)),
    );

    for url in candidates {
        if data_link_type(&url).is_some() {
            if !found.data_links.contains(&url) {
                found.data_links.push(url);
            }
        } else if found.submit_url.is_none() && is_submit_like(&url) {
            found.submit_url = Some(url);
        }
    }
    found
}
