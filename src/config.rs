use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ConfigError;

/// 整条链路的固定时间预算（3 分钟）
pub const CHAIN_BUDGET: Duration = Duration::from_secs(180);

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    // --- 服务 ---
    pub listen_host: String,
    pub listen_port: u16,
    /// `/solve` 等待链路结束的最长时间
    pub request_timeout_secs: u64,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- 身份校验 ---
    pub expected_email: String,
    pub expected_secret: SecretString,
    // --- LLM 配置 ---
    pub model_api_key: SecretString,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub reasoning_timeout_secs: u64,
    // --- 抓取与渲染 ---
    pub fetch_timeout_secs: u64,
    pub render_timeout_secs: u64,
    /// 页面加载后等待脚本执行的时间
    pub render_settle_ms: u64,
    pub chrome_executable: Option<String>,
    // --- 链路策略 ---
    pub submit_timeout_secs: u64,
    pub retry_backoff_ms: u64,
    pub max_steps: usize,
    pub max_attachments: usize,
    // --- 提取限制 ---
    pub max_table_rows: usize,
    pub max_text_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 8000,
            request_timeout_secs: 200,
            verbose_logging: false,
            expected_email: String::new(),
            expected_secret: SecretString::from(String::new()),
            model_api_key: SecretString::from(String::new()),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            reasoning_timeout_secs: 60,
            fetch_timeout_secs: 30,
            render_timeout_secs: 30,
            render_settle_ms: 2000,
            chrome_executable: None,
            submit_timeout_secs: 30,
            retry_backoff_ms: 1000,
            max_steps: 20,
            max_attachments: 3,
            max_table_rows: 100,
            max_text_chars: 3000,
        }
    }
}

/// TOML 配置文件，所有字段均可省略
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    listen_host: Option<String>,
    listen_port: Option<u16>,
    request_timeout_secs: Option<u64>,
    verbose_logging: Option<bool>,
    expected_email: Option<String>,
    llm_api_base_url: Option<String>,
    llm_model_name: Option<String>,
    reasoning_timeout_secs: Option<u64>,
    fetch_timeout_secs: Option<u64>,
    render_timeout_secs: Option<u64>,
    render_settle_ms: Option<u64>,
    chrome_executable: Option<String>,
    submit_timeout_secs: Option<u64>,
    retry_backoff_ms: Option<u64>,
    max_steps: Option<usize>,
    max_attachments: Option<usize>,
    max_table_rows: Option<usize>,
    max_text_chars: Option<usize>,
}

impl Config {
    /// 完整加载流程：`.env` → 默认值 → TOML 文件（`QUIZ_SOLVER_CONFIG`）→ 环境变量
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let base = match std::env::var("QUIZ_SOLVER_CONFIG") {
            Ok(path) => Self::from_toml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        let config = base.overlay_env()?;
        config.validate()?;
        Ok(config)
    }

    /// 只读环境变量，解析失败时回退到默认值
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            listen_host: std::env::var("LISTEN_HOST").unwrap_or(default.listen_host),
            listen_port: std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.listen_port),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.request_timeout_secs),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            expected_email: std::env::var("STUDENT_EMAIL").unwrap_or(default.expected_email),
            expected_secret: std::env::var("SECRET_STRING").map(SecretString::from).unwrap_or(default.expected_secret),
            model_api_key: std::env::var("LLM_API_KEY").map(SecretString::from).unwrap_or(default.model_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            reasoning_timeout_secs: std::env::var("REASONING_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.reasoning_timeout_secs),
            fetch_timeout_secs: std::env::var("FETCH_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.fetch_timeout_secs),
            render_timeout_secs: std::env::var("RENDER_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.render_timeout_secs),
            render_settle_ms: std::env::var("RENDER_SETTLE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.render_settle_ms),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().or(default.chrome_executable),
            submit_timeout_secs: std::env::var("SUBMIT_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.submit_timeout_secs),
            retry_backoff_ms: std::env::var("RETRY_BACKOFF_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.retry_backoff_ms),
            max_steps: std::env::var("MAX_STEPS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_steps),
            max_attachments: std::env::var("MAX_ATTACHMENTS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_attachments),
            max_table_rows: std::env::var("MAX_TABLE_ROWS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_table_rows),
            max_text_chars: std::env::var("MAX_TEXT_CHARS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_text_chars),
        }
    }

    /// 从 TOML 文件加载，未出现的字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::TomlParseFailed { message, .. } => ConfigError::TomlParseFailed {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(content).map_err(|e| ConfigError::TomlParseFailed {
            path: String::new(),
            message: e.to_string(),
        })?;

        let d = Self::default();
        Ok(Self {
            listen_host: file.listen_host.unwrap_or(d.listen_host),
            listen_port: file.listen_port.unwrap_or(d.listen_port),
            request_timeout_secs: file.request_timeout_secs.unwrap_or(d.request_timeout_secs),
            verbose_logging: file.verbose_logging.unwrap_or(d.verbose_logging),
            expected_email: file.expected_email.unwrap_or(d.expected_email),
            expected_secret: d.expected_secret,
            model_api_key: d.model_api_key,
            llm_api_base_url: file.llm_api_base_url.unwrap_or(d.llm_api_base_url),
            llm_model_name: file.llm_model_name.unwrap_or(d.llm_model_name),
            reasoning_timeout_secs: file.reasoning_timeout_secs.unwrap_or(d.reasoning_timeout_secs),
            fetch_timeout_secs: file.fetch_timeout_secs.unwrap_or(d.fetch_timeout_secs),
            render_timeout_secs: file.render_timeout_secs.unwrap_or(d.render_timeout_secs),
            render_settle_ms: file.render_settle_ms.unwrap_or(d.render_settle_ms),
            chrome_executable: file.chrome_executable.or(d.chrome_executable),
            submit_timeout_secs: file.submit_timeout_secs.unwrap_or(d.submit_timeout_secs),
            retry_backoff_ms: file.retry_backoff_ms.unwrap_or(d.retry_backoff_ms),
            max_steps: file.max_steps.unwrap_or(d.max_steps),
            max_attachments: file.max_attachments.unwrap_or(d.max_attachments),
            max_table_rows: file.max_table_rows.unwrap_or(d.max_table_rows),
            max_text_chars: file.max_text_chars.unwrap_or(d.max_text_chars),
        })
    }

    /// 用环境变量覆盖已有配置；变量存在但无法解析时报错
    fn overlay_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = std::env::var("LISTEN_HOST") {
            self.listen_host = v;
        }
        if let Some(v) = parse_env("PORT", "u16")? {
            self.listen_port = v;
        }
        if let Some(v) = parse_env("REQUEST_TIMEOUT_SECS", "u64")? {
            self.request_timeout_secs = v;
        }
        if let Some(v) = parse_env("VERBOSE_LOGGING", "bool")? {
            self.verbose_logging = v;
        }
        if let Ok(v) = std::env::var("STUDENT_EMAIL") {
            self.expected_email = v;
        }
        if let Ok(v) = std::env::var("SECRET_STRING") {
            self.expected_secret = SecretString::from(v);
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            self.model_api_key = SecretString::from(v);
        }
        if let Ok(v) = std::env::var("LLM_API_BASE_URL") {
            self.llm_api_base_url = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL_NAME") {
            self.llm_model_name = v;
        }
        if let Some(v) = parse_env("REASONING_TIMEOUT_SECS", "u64")? {
            self.reasoning_timeout_secs = v;
        }
        if let Some(v) = parse_env("FETCH_TIMEOUT_SECS", "u64")? {
            self.fetch_timeout_secs = v;
        }
        if let Some(v) = parse_env("RENDER_TIMEOUT_SECS", "u64")? {
            self.render_timeout_secs = v;
        }
        if let Some(v) = parse_env("RENDER_SETTLE_MS", "u64")? {
            self.render_settle_ms = v;
        }
        if let Ok(v) = std::env::var("CHROME_EXECUTABLE") {
            self.chrome_executable = Some(v);
        }
        if let Some(v) = parse_env("SUBMIT_TIMEOUT_SECS", "u64")? {
            self.submit_timeout_secs = v;
        }
        if let Some(v) = parse_env("RETRY_BACKOFF_MS", "u64")? {
            self.retry_backoff_ms = v;
        }
        if let Some(v) = parse_env("MAX_STEPS", "usize")? {
            self.max_steps = v;
        }
        if let Some(v) = parse_env("MAX_ATTACHMENTS", "usize")? {
            self.max_attachments = v;
        }
        if let Some(v) = parse_env("MAX_TABLE_ROWS", "usize")? {
            self.max_table_rows = v;
        }
        if let Some(v) = parse_env("MAX_TEXT_CHARS", "usize")? {
            self.max_text_chars = v;
        }
        Ok(self)
    }

    /// 启动前检查关键配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expected_email.trim().is_empty() {
            return Err(ConfigError::invalid("STUDENT_EMAIL", "不能为空"));
        }
        if self.expected_secret.expose_secret().is_empty() {
            return Err(ConfigError::invalid("SECRET_STRING", "不能为空"));
        }
        if self.max_steps == 0 {
            return Err(ConfigError::invalid("MAX_STEPS", "必须大于 0"));
        }
        if self.max_table_rows == 0 || self.max_text_chars == 0 {
            return Err(ConfigError::invalid("MAX_TABLE_ROWS/MAX_TEXT_CHARS", "必须大于 0"));
        }
        if self.reasoning_timeout_secs == 0 {
            return Err(ConfigError::invalid("REASONING_TIMEOUT_SECS", "必须大于 0"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            expected_email: "student@example.com".to_string(),
            expected_secret: SecretString::from("s3cret".to_string()),
            model_api_key: SecretString::from("test-key".to_string()),
            ..Self::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(var_name: &str, expected_type: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var_name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: expected_type.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
