//! 错误类型
//!
//! 媒体错误码沿用 `MediaError` 的编号：1 中止、2 网络、3 解码、4 源不受支持。

use thiserror::Error;

/// 播放过程中媒体资源上报的错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorCode {
    /// 加载被中止
    Aborted,
    /// 网络错误
    Network,
    /// 解码失败
    Decode,
    /// 源格式不受支持
    SrcNotSupported,
    /// 未知错误码
    Unknown(u16),
}

impl MediaErrorCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => MediaErrorCode::Aborted,
            2 => MediaErrorCode::Network,
            3 => MediaErrorCode::Decode,
            4 => MediaErrorCode::SrcNotSupported,
            other => MediaErrorCode::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            MediaErrorCode::Aborted => 1,
            MediaErrorCode::Network => 2,
            MediaErrorCode::Decode => 3,
            MediaErrorCode::SrcNotSupported => 4,
            MediaErrorCode::Unknown(code) => *code,
        }
    }
}

/// `play()` 被拒绝的原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayError {
    /// 不允许播放（自动播放被阻止或音频输出不可用）
    #[error("playback not allowed: {0}")]
    NotAllowed(String),
    /// 源格式不受支持
    #[error("unsupported format: {0}")]
    NotSupported(String),
    /// 网络错误
    #[error("network error: {0}")]
    Network(String),
    /// 播放请求被新的加载打断
    #[error("play request aborted by a new load")]
    Aborted,
    #[error("{0}")]
    Other(String),
}

/// 下载错误
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download() can only be called once")]
    AlreadyStarted,

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("server responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("stream interrupted: {0}")]
    Body(#[source] reqwest::Error),

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// 对应的媒体错误码
    pub fn media_code(&self) -> MediaErrorCode {
        match self {
            DownloadError::Status(_) => MediaErrorCode::SrcNotSupported,
            DownloadError::Cancelled | DownloadError::AlreadyStarted => MediaErrorCode::Aborted,
            DownloadError::Client(_) | DownloadError::Request(_) | DownloadError::Body(_) => {
                MediaErrorCode::Network
            }
        }
    }

    /// 转换为 `play()` 的拒绝原因
    pub fn to_play_error(&self) -> PlayError {
        match self.media_code() {
            MediaErrorCode::SrcNotSupported => PlayError::NotSupported(self.to_string()),
            MediaErrorCode::Aborted => PlayError::Aborted,
            _ => PlayError::Network(self.to_string()),
        }
    }
}

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
