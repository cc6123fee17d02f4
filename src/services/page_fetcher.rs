//! 页面抓取服务 - 业务能力层
//!
//! HTTP GET 拿到原始内容并判定类型；需要执行脚本的 HTML 交给渲染器。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::config::Config;
use crate::error::FetchError;
use crate::infrastructure::Renderer;
use crate::models::{ContentType, QuizStep};
use crate::services::extractor::visible_text;

/// 可见文字少于这个数时，页面可能依赖脚本生成内容
const MIN_VISIBLE_CHARS: usize = 40;

/// 占位标记：出现即说明内容由脚本填充
const SCRIPT_MARKERS: &[&str] = &["atob(", "document.write", "enable javascript"];

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// 抓取一个地址，整个过程不超过 `timeout`
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<QuizStep, FetchError>;
}

/// 基于 reqwest 的抓取器
///
/// 每条链路一个实例，cookie 只在本链路内共享。
pub struct HttpPageFetcher {
    client: reqwest::Client,
    renderer: Arc<dyn Renderer>,
    render_timeout: Duration,
}

impl HttpPageFetcher {
    pub fn new(config: &Config, renderer: Arc<dyn Renderer>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(concat!("quiz-chain-solver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::request("", e))?;

        Ok(Self {
            client,
            renderer,
            render_timeout: Duration::from_secs(config.render_timeout_secs),
        })
    }

    /// 共享同一个 cookie 存储的客户端，提交答案时使用
    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    async fn get(&self, url: &str) -> Result<(Option<String>, Vec<u8>), FetchError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        Ok((content_type, body.to_vec()))
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<QuizStep, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: url.to_string(),
                message: format!("不支持的协议 {}", parsed.scheme()),
            });
        }

        let started = Instant::now();
        let (header, body) = tokio::time::timeout(timeout, self.get(url))
            .await
            .map_err(|_| FetchError::Timeout {
                url: url.to_string(),
                timeout,
            })??;

        let content_type = classify_content(header.as_deref(), url, &body);
        debug!("📥 {} -> {} ({} 字节)", url, content_type, body.len());

        if content_type == ContentType::Html && requires_rendering(&String::from_utf8_lossy(&body)) {
            let remaining = timeout.saturating_sub(started.elapsed());
            let render_timeout = self.render_timeout.min(remaining);
            if render_timeout.is_zero() {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    timeout,
                });
            }

            info!("🌐 页面依赖脚本，启动无头浏览器渲染: {}", url);
            let html = self.renderer.render(url, render_timeout).await?;
            let mut step = QuizStep::new(url, html.into_bytes(), ContentType::Html);
            step.rendered = true;
            return Ok(step);
        }

        Ok(QuizStep::new(url, body, content_type))
    }
}

/// 判定内容类型：先看 Content-Type，再看扩展名，最后看文件头
pub fn classify_content(header: Option<&str>, url: &str, body: &[u8]) -> ContentType {
    if let Some(ct) = header.and_then(from_mime) {
        return ct;
    }

    let path = Url::parse(url).map(|u| u.path().to_string()).unwrap_or_default();
    if let Some(ct) = path
        .rsplit_once('.')
        .and_then(|(_, ext)| ContentType::from_extension(ext))
        .filter(|ct| *ct != ContentType::Unknown)
    {
        return ct;
    }

    sniff(body)
}

fn from_mime(header: &str) -> Option<ContentType> {
    let mime = header.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "text/html" | "application/xhtml+xml" => Some(ContentType::Html),
        "application/pdf" => Some(ContentType::Pdf),
        "text/csv" | "application/csv" => Some(ContentType::Csv),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" | "application/vnd.ms-excel" => {
            Some(ContentType::Xlsx)
        }
        "application/json" | "text/json" => Some(ContentType::Json),
        m if m.ends_with("+json") => Some(ContentType::Json),
        _ => None,
    }
}

fn sniff(body: &[u8]) -> ContentType {
    if body.starts_with(b"%PDF") {
        return ContentType::Pdf;
    }
    if body.starts_with(b"PK\x03\x04") {
        return ContentType::Xlsx;
    }
    let body = body.strip_prefix("\u{feff}".as_bytes()).unwrap_or(body);
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') | Some(b'[') => ContentType::Json,
        Some(b'<') => ContentType::Html,
        _ => ContentType::Unknown,
    }
}

/// HTML 是否需要执行脚本后才能拿到题目
pub fn requires_rendering(html: &str) -> bool {
    let lowered = html.to_lowercase();
    if SCRIPT_MARKERS.iter().any(|m| lowered.contains(m)) {
        return true;
    }

    let document = Html::parse_document(html);
    let has_scripts = Selector::parse("script")
        .map(|sel| document.select(&sel).next().is_some())
        .unwrap_or(false);

    if let Ok(sel) = Selector::parse("#result") {
        if let Some(result) = document.select(&sel).next() {
            if visible_text(result).is_empty() {
                return true;
            }
        }
    }

    if !has_scripts {
        return false;
    }
    let visible = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next().map(visible_text))
        .unwrap_or_default();
    visible.chars().count() < MIN_VISIBLE_CHARS
}
