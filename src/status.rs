//! 连接状态跟踪
//!
//! 把媒体资源的原始事件映射为 [`PlaybackStatus`] 与可选的提示文本。
//! 这里只更新显示状态，从不操作媒体资源本身。

use std::fmt;

use crate::error::{MediaErrorCode, PlayError};
use crate::events::PlayerEvent;

pub const MSG_ABORTED: &str = "Lecture interrompue.";
pub const MSG_NETWORK: &str = "Erreur réseau : le flux radio est injoignable.";
pub const MSG_DECODE: &str = "Erreur de décodage du flux audio.";
pub const MSG_SRC_NOT_SUPPORTED: &str = "Format audio non supporté par ce lecteur.";
pub const MSG_LOAD_FAILED: &str = "Impossible de charger le flux radio.";

pub const MSG_PLAY_BLOCKED: &str = "Lecture bloquée : appuyez sur lecture pour démarrer.";
pub const MSG_PLAY_UNSUPPORTED: &str = "Format audio non supporté.";
pub const MSG_PLAY_NETWORK: &str = "Erreur de connexion au flux.";
pub const MSG_PLAY_FAILED: &str = "Erreur lors de la lecture.";

pub const MSG_RETRY_EXHAUSTED: &str =
    "Connexion perdue après plusieurs tentatives. Appuyez sur lecture pour réessayer.";

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Initializing,
    Connecting,
    Buffering,
    Playing,
    Paused,
    Reconnecting,
    Error,
    Ready,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackStatus::Initializing => "initializing",
            PlaybackStatus::Connecting => "connecting",
            PlaybackStatus::Buffering => "buffering",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Paused => "paused",
            PlaybackStatus::Reconnecting => "reconnecting",
            PlaybackStatus::Error => "error",
            PlaybackStatus::Ready => "ready",
        };
        f.write_str(label)
    }
}

/// 错误码对应的提示文本，未知错误码使用通用文本
pub fn error_message(code: MediaErrorCode) -> &'static str {
    match code {
        MediaErrorCode::Aborted => MSG_ABORTED,
        MediaErrorCode::Network => MSG_NETWORK,
        MediaErrorCode::Decode => MSG_DECODE,
        MediaErrorCode::SrcNotSupported => MSG_SRC_NOT_SUPPORTED,
        MediaErrorCode::Unknown(_) => MSG_LOAD_FAILED,
    }
}

/// `play()` 被拒绝时的提示文本
pub fn play_rejection_message(err: &PlayError) -> &'static str {
    match err {
        PlayError::NotAllowed(_) => MSG_PLAY_BLOCKED,
        PlayError::NotSupported(_) => MSG_PLAY_UNSUPPORTED,
        PlayError::Network(_) => MSG_PLAY_NETWORK,
        PlayError::Aborted | PlayError::Other(_) => MSG_PLAY_FAILED,
    }
}

/// 提示文本的变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageUpdate {
    Keep,
    Clear,
    Set(&'static str),
}

/// 单个事件引起的状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: PlaybackStatus,
    pub message: MessageUpdate,
}

impl Transition {
    fn to(status: PlaybackStatus) -> Self {
        Self {
            status,
            message: MessageUpdate::Keep,
        }
    }
}

/// 根据当前状态与事件计算下一个状态
///
/// stalled 与 ended 不改变状态，由重试控制器决定后续动作。
pub fn transition(current: PlaybackStatus, event: &PlayerEvent) -> Transition {
    match event {
        PlayerEvent::LoadStart => Transition::to(PlaybackStatus::Connecting),
        PlayerEvent::LoadedData | PlayerEvent::Waiting => Transition::to(PlaybackStatus::Buffering),
        PlayerEvent::CanPlay if current == PlaybackStatus::Playing => Transition::to(current),
        PlayerEvent::CanPlay => Transition::to(PlaybackStatus::Ready),
        PlayerEvent::Play | PlayerEvent::Playing => Transition {
            status: PlaybackStatus::Playing,
            message: MessageUpdate::Clear,
        },
        PlayerEvent::Pause => Transition::to(PlaybackStatus::Paused),
        PlayerEvent::Error { code } => Transition {
            status: PlaybackStatus::Error,
            message: MessageUpdate::Set(error_message(*code)),
        },
        PlayerEvent::Stalled
        | PlayerEvent::Ended
        | PlayerEvent::VolumeChange
        | PlayerEvent::Emptied => Transition::to(current),
    }
}

/// 控制器持有的全部界面状态
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub status: PlaybackStatus,
    pub message: Option<&'static str>,
    pub autoplay_blocked: bool,
    /// 与 status 不同，缓冲期间仍保持为 true
    pub playing: bool,
    pub volume: f32,
    pub muted: bool,
    /// 静音前的音量
    pub saved_volume: f32,
    pub retry_count: u32,
}

impl PlayerState {
    pub fn new(volume: f32) -> Self {
        Self {
            status: PlaybackStatus::Initializing,
            message: None,
            autoplay_blocked: false,
            playing: false,
            volume,
            muted: volume == 0.0,
            saved_volume: if volume > 0.0 { volume } else { 1.0 },
            retry_count: 0,
        }
    }

    /// 应用一个媒体事件，返回状态是否发生变化
    pub fn apply(&mut self, event: &PlayerEvent) -> bool {
        let before = self.clone();
        let next = transition(self.status, event);
        self.status = next.status;
        match next.message {
            MessageUpdate::Keep => {}
            MessageUpdate::Clear => self.message = None,
            MessageUpdate::Set(text) => self.message = Some(text),
        }
        match event {
            PlayerEvent::Play | PlayerEvent::Playing => {
                self.playing = true;
                self.autoplay_blocked = false;
            }
            PlayerEvent::Pause | PlayerEvent::Error { .. } => self.playing = false,
            _ => {}
        }
        *self != before
    }
}
