use crate::error::MediaErrorCode;

/// 播放器事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// 开始加载流（对应 loadstart 事件）
    LoadStart,
    /// 收到首批数据，尚不可播放（对应 loadeddata 事件）
    LoadedData,
    /// 解码器已就绪，可以播放（对应 canplay 事件）
    CanPlay,
    /// 缓冲区耗尽，等待数据（对应 waiting 事件）
    Waiting,
    /// 播放请求已被接受（对应 play 事件）
    Play,
    /// 正在输出音频（对应 playing 事件）
    Playing,
    /// 播放暂停（对应 pause 事件）
    Pause,
    /// 网络长时间无数据（对应 stalled 事件）
    Stalled,
    /// 流结束（对应 ended 事件）
    Ended,
    /// 音量变化（对应 volumechange 事件）
    VolumeChange,
    /// 媒体内容已清空（对应 emptied 事件）
    Emptied,
    /// 错误发生（对应 error 事件）
    Error { code: MediaErrorCode },
}

impl PlayerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::LoadStart => "loadstart",
            PlayerEvent::LoadedData => "loadeddata",
            PlayerEvent::CanPlay => "canplay",
            PlayerEvent::Waiting => "waiting",
            PlayerEvent::Play => "play",
            PlayerEvent::Playing => "playing",
            PlayerEvent::Pause => "pause",
            PlayerEvent::Stalled => "stalled",
            PlayerEvent::Ended => "ended",
            PlayerEvent::VolumeChange => "volumechange",
            PlayerEvent::Emptied => "emptied",
            PlayerEvent::Error { .. } => "error",
        }
    }
}
