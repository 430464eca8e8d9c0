use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RadioConfig;
use crate::decoder;
use crate::error::{DownloadError, MediaErrorCode, PlayError};
use crate::events::PlayerEvent;
use crate::loader::{DownloadEvent, Downloader};
use crate::reader::{LiveBuffer, LiveReader};

/// `play()` 的结果，与媒体资源本身的借用无关，可以在之后任意时刻等待或丢弃
pub type PlayFuture = LocalBoxFuture<'static, Result<(), PlayError>>;

/// 媒体资源：加载、播放、暂停、调节音量，并通过订阅通道上报生命周期事件
pub trait MediaElement {
    /// 订阅事件，再次订阅会替换之前的订阅；接收端被丢弃即取消订阅
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PlayerEvent>;
    /// 丢弃当前源并重新开始加载
    fn load(&mut self);
    /// 开始播放；返回的 future 在源就绪并开始输出后完成，可能被拒绝。
    /// 丢弃该 future 即放弃这次播放
    fn play(&mut self) -> PlayFuture;
    fn pause(&mut self);
    fn set_volume(&mut self, volume: f32);
}

/// [`StreamPlayer`] 的运行参数
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub url: String,
    pub mime_types: Vec<String>,
    pub connect_timeout: Duration,
    pub stall_timeout: Duration,
    pub play_timeout: Duration,
    pub max_buffered: usize,
}

impl From<&RadioConfig> for PlayerSettings {
    fn from(config: &RadioConfig) -> Self {
        Self {
            url: config.stream_url.clone(),
            mime_types: config.mime_types.clone(),
            connect_timeout: config.network.connect_timeout(),
            stall_timeout: config.network.stall_timeout(),
            play_timeout: config.network.play_timeout(),
            max_buffered: config.network.max_buffered_bytes,
        }
    }
}

type Subscriber = Arc<Mutex<Option<mpsc::UnboundedSender<PlayerEvent>>>>;

/// 事件发送端，绑定到一次加载；加载被取消后发送的事件会被丢弃
#[derive(Clone)]
struct Emitter {
    subscriber: Subscriber,
    token: Option<CancellationToken>,
}

impl Emitter {
    fn emit(&self, event: PlayerEvent) {
        if let Some(ref token) = self.token {
            if token.is_cancelled() {
                return;
            }
        }
        if let Some(ref tx) = *self.subscriber.lock().unwrap_or_else(PoisonError::into_inner) {
            let _ = tx.send(event);
        }
    }
}

#[derive(Debug, Clone)]
enum LoadState {
    Loading,
    Ready,
    Failed(PlayError),
}

type SourceSlot = Arc<Mutex<Option<rodio::Decoder<LiveReader>>>>;

/// 一次加载的全部资源
#[derive(Clone)]
struct LoadHandle {
    token: CancellationToken,
    ready: watch::Receiver<LoadState>,
    source: SourceSlot,
    buffer: LiveBuffer,
    playback_started: Arc<AtomicBool>,
}

/// 输出设备与当前的 sink
struct Output {
    stream: Option<OutputStream>,
    sink: Option<Arc<Sink>>,
    volume: f32,
}

impl Output {
    fn ensure_stream(&mut self) -> Result<&OutputStream, PlayError> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                let stream = OutputStreamBuilder::open_default_stream().map_err(|e| {
                    error!("failed to open audio output: {}", e);
                    PlayError::NotAllowed(format!("audio output unavailable: {}", e))
                })?;
                info!("audio output opened");
                stream
            }
        };
        Ok(&*self.stream.insert(stream))
    }
}

type SharedOutput = Arc<Mutex<Output>>;

fn lock_output(output: &SharedOutput) -> MutexGuard<'_, Output> {
    output.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 基于 rodio 的直播流播放器
///
/// 输出设备在第一次播放时才打开，打不开时 `play()` 以 [`PlayError::NotAllowed`] 拒绝。
pub struct StreamPlayer {
    settings: Arc<PlayerSettings>,
    output: SharedOutput,
    subscriber: Subscriber,
    current: Option<LoadHandle>,
}

impl StreamPlayer {
    pub fn new(settings: PlayerSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            output: Arc::new(Mutex::new(Output {
                stream: None,
                sink: None,
                volume: 1.0,
            })),
            subscriber: Arc::new(Mutex::new(None)),
            current: None,
        }
    }

    fn emitter(&self, token: Option<CancellationToken>) -> Emitter {
        Emitter {
            subscriber: self.subscriber.clone(),
            token,
        }
    }

    fn emit(&self, event: PlayerEvent) {
        self.emitter(None).emit(event);
    }

    /// 取消当前加载并停止输出，返回之前是否有源
    fn teardown(&mut self) -> bool {
        let had_source = self.current.is_some();
        if let Some(current) = self.current.take() {
            // 通知Reader与下载任务停止，以免不再使用的线程继续阻塞
            current.token.cancel();
        }
        if let Some(sink) = lock_output(&self.output).sink.take() {
            sink.stop();
        }
        had_source
    }
}

impl MediaElement for StreamPlayer {
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PlayerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    fn load(&mut self) {
        if self.teardown() {
            self.emit(PlayerEvent::Emptied);
        }

        let token = CancellationToken::new();
        let emitter = self.emitter(Some(token.clone()));
        let buffer = LiveBuffer::new(self.settings.max_buffered);
        let mut reader = buffer.reader(token.clone());
        let reader_emitter = emitter.clone();
        reader.set_callback(move |event| reader_emitter.emit(event));
        let playback_started = reader.playback_started();

        let (ready_tx, ready_rx) = watch::channel(LoadState::Loading);
        let source: SourceSlot = Arc::new(Mutex::new(None));

        debug!(url = %self.settings.url, "loading stream");
        emitter.emit(PlayerEvent::LoadStart);

        tokio::spawn(load_stream(
            self.settings.clone(),
            buffer.clone(),
            reader,
            emitter,
            ready_tx,
            source.clone(),
            token.clone(),
        ));

        self.current = Some(LoadHandle {
            token,
            ready: ready_rx,
            source,
            buffer,
            playback_started,
        });
    }

    fn play(&mut self) -> PlayFuture {
        let Some(current) = self.current.clone() else {
            return async { Err(PlayError::NotSupported("no source loaded".into())) }.boxed_local();
        };
        let output = self.output.clone();
        let emitter = self.emitter(Some(current.token.clone()));
        let play_timeout = self.settings.play_timeout;

        async move {
            let LoadHandle {
                token,
                mut ready,
                source,
                buffer,
                playback_started,
            } = current;

            let state = match tokio::time::timeout(
                play_timeout,
                ready.wait_for(|s| !matches!(s, LoadState::Loading)),
            )
            .await
            {
                Err(_) => {
                    return Err(PlayError::Network(
                        "timed out waiting for the stream".into(),
                    ))
                }
                Ok(Err(_)) => return Err(PlayError::Aborted),
                Ok(Ok(state)) => state.clone(),
            };
            if let LoadState::Failed(err) = state {
                return Err(err);
            }
            // 等待期间已重新加载
            if token.is_cancelled() {
                return Err(PlayError::Aborted);
            }

            let mut output = lock_output(&output);

            // 已在输出，仅从暂停恢复
            if let Some(sink) = output.sink.as_ref() {
                if sink.is_paused() {
                    sink.play();
                    emitter.emit(PlayerEvent::Play);
                    emitter.emit(PlayerEvent::Playing);
                }
                return Ok(());
            }

            let decoder = source
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or(PlayError::Aborted)?;

            let volume = output.volume;
            let stream = output.ensure_stream()?;
            let sink = Arc::new(Sink::connect_new(stream.mixer()));
            sink.set_volume(volume);
            sink.append(decoder);
            sink.play();
            playback_started.store(true, Ordering::Release);

            emitter.emit(PlayerEvent::Play);
            watch_end(sink.clone(), buffer, emitter.clone());
            output.sink = Some(sink);
            emitter.emit(PlayerEvent::Playing);
            Ok(())
        }
        .boxed_local()
    }

    fn pause(&mut self) {
        if let Some(sink) = lock_output(&self.output).sink.as_ref() {
            sink.pause();
        }
        self.emit(PlayerEvent::Pause);
    }

    fn set_volume(&mut self, volume: f32) {
        {
            let mut output = lock_output(&self.output);
            output.volume = volume;
            if let Some(sink) = output.sink.as_ref() {
                sink.set_volume(volume);
            }
        }
        self.emit(PlayerEvent::VolumeChange);
    }
}

impl Drop for StreamPlayer {
    fn drop(&mut self) {
        self.teardown();
        *self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// 加载任务：连接、探测格式，然后持有下载器直到本次加载被取消
async fn load_stream(
    settings: Arc<PlayerSettings>,
    buffer: LiveBuffer,
    reader: LiveReader,
    emitter: Emitter,
    ready_tx: watch::Sender<LoadState>,
    source: SourceSlot,
    token: CancellationToken,
) {
    let downloader = Downloader::new(
        buffer.clone(),
        settings.connect_timeout,
        settings.stall_timeout,
        token.clone(),
    );
    let download_emitter = emitter.clone();
    downloader.handle_message(move |event| match event {
        DownloadEvent::FirstChunk => download_emitter.emit(PlayerEvent::LoadedData),
        DownloadEvent::Stalled => download_emitter.emit(PlayerEvent::Stalled),
        DownloadEvent::Completed => debug!("server closed the stream"),
        // 连接失败由下面的返回值处理，传输中断由 watch_end 上报
        DownloadEvent::HeaderReceived | DownloadEvent::Failed => {}
    });

    let info = match downloader.download(&settings.url, None).await {
        Ok(info) => info,
        Err(DownloadError::Cancelled) => {
            let _ = ready_tx.send(LoadState::Failed(PlayError::Aborted));
            return;
        }
        Err(e) => {
            warn!("failed to connect to stream: {}", e);
            emitter.emit(PlayerEvent::Error {
                code: e.media_code(),
            });
            let _ = ready_tx.send(LoadState::Failed(e.to_play_error()));
            return;
        }
    };

    let mime_type =
        decoder::select_mime_type(info.content_type.as_deref(), &settings.mime_types)
            .map(str::to_owned);
    debug!(?mime_type, "probing stream format");

    let probe = tokio::task::spawn_blocking(move || decoder::open(reader, mime_type.as_deref()));
    let probed = tokio::select! {
        _ = token.cancelled() => {
            let _ = ready_tx.send(LoadState::Failed(PlayError::Aborted));
            return;
        }
        probed = probe => probed,
    };

    match probed {
        Ok(Ok(decoded)) => {
            *source.lock().unwrap_or_else(PoisonError::into_inner) = Some(decoded);
            emitter.emit(PlayerEvent::CanPlay);
            let _ = ready_tx.send(LoadState::Ready);
        }
        Ok(Err(e)) => {
            let code = if buffer.is_failed() {
                MediaErrorCode::Network
            } else {
                decoder::error_code(&e)
            };
            warn!(code = code.code(), "failed to decode stream: {}", e);
            emitter.emit(PlayerEvent::Error { code });
            let err = match code {
                MediaErrorCode::Network => PlayError::Network(e.to_string()),
                _ => PlayError::NotSupported(e.to_string()),
            };
            let _ = ready_tx.send(LoadState::Failed(err));
            return;
        }
        Err(e) => {
            error!("decoder task failed: {}", e);
            emitter.emit(PlayerEvent::Error {
                code: MediaErrorCode::Decode,
            });
            let _ = ready_tx.send(LoadState::Failed(PlayError::Other(e.to_string())));
            return;
        }
    }

    token.cancelled().await;
    drop(downloader);
}

/// 等待输出结束，上报 ended，传输中断时上报 network error
fn watch_end(sink: Arc<Sink>, buffer: LiveBuffer, emitter: Emitter) {
    tokio::task::spawn_blocking(move || {
        sink.sleep_until_end();
        if buffer.is_failed() {
            emitter.emit(PlayerEvent::Error {
                code: MediaErrorCode::Network,
            });
        } else {
            emitter.emit(PlayerEvent::Ended);
        }
    });
}
