//! 无头浏览器渲染 - 基础设施层
//!
//! 每次渲染启动一个独立的浏览器会话，用完即关，不在链路之间共享。

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::RenderError;
use crate::infrastructure::js_executor::JsExecutor;

/// 渲染能力：`render(url) -> 执行完脚本后的 HTML`
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str, timeout: Duration) -> Result<String, RenderError>;
}

/// 基于 chromiumoxide 的渲染器
#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    chrome_executable: Option<PathBuf>,
    settle: Duration,
}

impl ChromiumRenderer {
    pub fn new(config: &Config) -> Self {
        Self {
            chrome_executable: config.chrome_executable.as_ref().map(PathBuf::from),
            settle: Duration::from_millis(config.render_settle_ms),
        }
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn render(&self, url: &str, timeout: Duration) -> Result<String, RenderError> {
        info!("🚀 启动无头浏览器渲染: {}", url);
        let started = Instant::now();

        let session = match tokio::time::timeout(timeout, RenderSession::launch(self.chrome_executable.clone())).await {
            Ok(session) => session?,
            Err(_) => {
                return Err(RenderError::Timeout {
                    url: url.to_string(),
                    timeout,
                })
            }
        };

        let remaining = timeout.saturating_sub(started.elapsed());
        let result = match tokio::time::timeout(remaining, session.load(url, self.settle)).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::Timeout {
                url: url.to_string(),
                timeout,
            }),
        };

        // 无论成功与否都要关闭会话
        session.close().await;

        if let Ok(html) = &result {
            info!("✅ 渲染完成: {} ({} 字节, 用时 {:?})", url, html.len(), started.elapsed());
        }
        result
    }
}

/// 一次渲染会话：浏览器进程 + 事件处理任务
struct RenderSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl RenderSession {
    async fn launch(chrome_executable: Option<PathBuf>) -> Result<Self, RenderError> {
        let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
        ]);
        if let Some(path) = chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(RenderError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;
        debug!("无头浏览器启动成功");

        // 在后台处理浏览器事件
        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(Self { browser, handler_task })
    }

    async fn load(&self, url: &str, settle: Duration) -> Result<String, RenderError> {
        let page = self.browser.new_page(url).await.map_err(|e| RenderError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        page.wait_for_navigation().await.map_err(|e| RenderError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let executor = JsExecutor::new(page);

        // 等待脚本把内容写进页面，最多等 settle
        let poll = Duration::from_millis(200);
        let waited = Instant::now();
        while waited.elapsed() < settle {
            match executor.visible_text_len().await {
                Ok(len) if len > 0 => break,
                Ok(_) => {}
                Err(e) => debug!("可见文本检查失败: {}", e),
            }
            tokio::time::sleep(poll).await;
        }

        let html = executor.outer_html().await?;
        if html.trim().is_empty() {
            return Err(RenderError::Empty { url: url.to_string() });
        }
        Ok(html)
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("关闭浏览器失败: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("等待浏览器进程退出失败: {}", e);
        }
        self.handler_task.abort();
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // 需要本机安装 Chrome：cargo test -- --ignored
    async fn test_render_static_page() {
        let renderer = ChromiumRenderer::new(&Config::default());
        let html = renderer
            .render("data:text/html,<p id=result>hello</p>", Duration::from_secs(30))
            .await
            .expect("渲染失败");
        assert!(html.contains("hello"));
    }
}
