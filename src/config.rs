//! 播放器配置
//!
//! 从可选的 TOML 文件加载，缺省字段使用默认值，再由命令行参数覆盖。

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

pub const DEFAULT_STREAM_URL: &str = "https://terranoradio-serveur.terranoweb.com/letempsdedieu";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// 电台流地址
    pub stream_url: String,
    /// 候选 MIME 类型，按顺序尝试；全部不受支持时不带提示直接探测
    pub mime_types: Vec<String>,
    /// 初始音量 (0..=1)
    pub volume: f32,
    /// 启动时是否自动播放
    pub autoplay: bool,
    pub retry: RetryConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_retries: u32,
    pub ended_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_ms: u64,
    /// 超过该时长没有收到数据即视为停滞
    pub stall_timeout_ms: u64,
    /// `play()` 等待流就绪的最长时间
    pub play_timeout_ms: u64,
    /// 暂停期间最多缓存的字节数，超出时丢弃最旧的数据
    pub max_buffered_bytes: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            mime_types: vec!["audio/mpeg".to_string(), "audio/aac".to_string()],
            volume: 1.0,
            autoplay: true,
            retry: RetryConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_retries: policy.max_retries,
            ended_delay_ms: policy.ended_delay.as_millis() as u64,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            stall_timeout_ms: 3_000,
            play_timeout_ms: 15_000,
            max_buffered_bytes: 4 * 1024 * 1024,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_retries: self.max_retries,
            ended_delay: Duration::from_millis(self.ended_delay_ms),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn play_timeout(&self) -> Duration {
        Duration::from_millis(self.play_timeout_ms)
    }
}

impl RadioConfig {
    /// 从 TOML 文件加载
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: RadioConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_url.trim().is_empty() {
            return Err(ConfigError::Invalid("stream_url must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(ConfigError::Invalid(format!(
                "volume must be within 0..=1, got {}",
                self.volume
            )));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must be greater than 0".into(),
            ));
        }
        if self.network.max_buffered_bytes == 0 {
            return Err(ConfigError::Invalid(
                "network.max_buffered_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
