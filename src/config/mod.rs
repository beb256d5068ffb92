// 配置管理模块

use crate::auth::{EnvToken, StaticToken, TokenProvider, DEFAULT_TOKEN_ENV};
use crate::uploader::chunk::{MIB, MIN_CHUNK_SIZE};
use crate::uploader::retry::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 后端接口配置
    #[serde(default)]
    pub api: ApiConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 后端接口配置
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// 后端基础地址
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 固定访问令牌（优先于环境变量）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// 读取访问令牌的环境变量
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// 单个请求超时（秒），未设置时不限制
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_base_url() -> String {
    "http://localhost:8503".to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            token_env: default_token_env(),
            request_timeout_secs: None,
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("token_env", &self.token_env)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ApiConfig {
    /// 根据配置选择令牌来源：配置了固定令牌时使用它，否则每次请求读取环境变量
    pub fn token_provider(&self) -> Arc<dyn TokenProvider> {
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Arc::new(StaticToken::new(token)),
            _ => Arc::new(EnvToken::new(self.token_env.clone())),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 超过此大小 (MB) 使用分片上传，恰好等于时仍走单请求上传
    #[serde(default = "default_standard_threshold_mb")]
    pub standard_threshold_mb: u64,
    /// 超过此大小 (MB) 先调用视频优化钩子
    #[serde(default = "default_compression_threshold_mb")]
    pub compression_threshold_mb: u64,
    /// 分片大小 (MB)，不小于 5MB
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    /// 单文件大小上限 (MB)
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// 分片最大尝试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 分片重试间隔（毫秒）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_standard_threshold_mb() -> u64 {
    10
}

fn default_compression_threshold_mb() -> u64 {
    20
}

fn default_chunk_size_mb() -> u64 {
    5
}

fn default_max_file_size_mb() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            standard_threshold_mb: default_standard_threshold_mb(),
            compression_threshold_mb: default_compression_threshold_mb(),
            chunk_size_mb: default_chunk_size_mb(),
            max_file_size_mb: default_max_file_size_mb(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl UploadConfig {
    pub fn standard_threshold_bytes(&self) -> u64 {
        self.standard_threshold_mb.saturating_mul(MIB)
    }

    pub fn compression_threshold_bytes(&self) -> u64 {
        self.compression_threshold_mb.saturating_mul(MIB)
    }

    /// 分片大小（字节），低于 5MB 时按 5MB 计
    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_mb.saturating_mul(MIB).max(MIN_CHUNK_SIZE)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(MIB)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size_mb == 0 {
            anyhow::bail!("max_file_size_mb 必须大于 0");
        }
        if self.max_retries == 0 {
            anyhow::bail!("max_retries 至少为 1");
        }
        for (name, mb) in [
            ("standard_threshold_mb", self.standard_threshold_mb),
            ("compression_threshold_mb", self.compression_threshold_mb),
            ("chunk_size_mb", self.chunk_size_mb),
            ("max_file_size_mb", self.max_file_size_mb),
        ] {
            if mb.checked_mul(MIB).is_none() {
                anyhow::bail!("{}={} 超出可表示的字节数", name, mb);
            }
        }
        if self.chunk_size_mb.saturating_mul(MIB) < MIN_CHUNK_SIZE {
            tracing::warn!(
                "chunk_size_mb={} 小于最小分片大小，将按 {}MB 处理",
                self.chunk_size_mb,
                MIN_CHUNK_SIZE / MIB
            );
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否写入日志文件
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    20 * MIB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config
            .upload
            .validate()
            .context("配置文件中的上传参数无效")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.upload.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("配置已保存: {}", path);
        Ok(())
    }

    /// 加载配置，失败时使用默认配置并尝试写出
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {:#}", e);
                    }
                }

                default_config
            }
        }
    }
}
