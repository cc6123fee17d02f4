//! JS 执行器 - 基础设施层
//!
//! 持有一次渲染会话中唯一的 page 资源，只暴露"执行 JS"的能力

use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::RenderError;

/// 读取完整 DOM
const OUTER_HTML_JS: &str = "(() => document.documentElement ? document.documentElement.outerHTML : '')()";

/// 统计页面上可见文本长度，用于判断脚本是否已经把内容写进页面
const VISIBLE_TEXT_LEN_JS: &str = "(() => (document.body ? document.body.innerText.trim().length : 0))()";

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 eval() 能力
/// - 不认识 QuizStep / ChainState
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue, RenderError> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result
            .into_value::<JsonValue>()
            .map_err(|e| RenderError::Script(e.to_string()))?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T, RenderError> {
        let json_value = self.eval(js_code).await?;
        serde_json::from_value(json_value).map_err(|e| RenderError::Script(e.to_string()))
    }

    pub async fn outer_html(&self) -> Result<String, RenderError> {
        self.eval_as::<String>(OUTER_HTML_JS).await
    }

    pub async fn visible_text_len(&self) -> Result<u64, RenderError> {
        self.eval_as::<u64>(VISIBLE_TEXT_LEN_JS).await
    }
}
