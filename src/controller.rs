//! # 电台控制器
//!
//! 持有媒体资源、[`PlayerState`] 与 [`RetryController`]。
//! 媒体事件、用户命令与唯一的重试定时器都在 [`RadioController::run`] 的
//! `select!` 循环中处理，同一时刻最多只有一次待执行的重连。

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::RadioConfig;
use crate::error::PlayError;
use crate::events::PlayerEvent;
use crate::player::{MediaElement, PlayFuture};
use crate::retry::{PendingRetry, RetryController, RetryDecision, RetryReason};
use crate::status::{
    play_rejection_message, PlaybackStatus, PlayerState, MSG_PLAY_NETWORK, MSG_RETRY_EXHAUSTED,
};

/// 音量步进
pub const VOLUME_STEP: f32 = 0.1;

/// 用户命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    TogglePlay,
    SetVolume(f32),
    VolumeUp,
    VolumeDown,
    ToggleMute,
    /// 重新输出当前状态
    ShowStatus,
    Quit,
}

impl Command {
    /// 解析一行终端输入
    pub fn parse(line: &str) -> Option<Command> {
        let mut parts = line.split_whitespace();
        let head = match parts.next() {
            Some(head) => head,
            // 单独的空格
            None if line.contains(' ') => return Some(Command::TogglePlay),
            None => return None,
        };
        match head {
            "p" | "play" | "pause" => Some(Command::TogglePlay),
            "+" => Some(Command::VolumeUp),
            "-" => Some(Command::VolumeDown),
            "m" | "mute" => Some(Command::ToggleMute),
            "s" | "status" => Some(Command::ShowStatus),
            "q" | "quit" => Some(Command::Quit),
            "v" | "volume" => parts
                .next()
                .and_then(|v| v.parse::<f32>().ok())
                .map(Command::SetVolume),
            _ => None,
        }
    }
}

type Observer = Box<dyn Fn(&PlayerState) + 'static>;

/// 发起 `play()` 的一方，决定拒绝时如何处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayOrigin {
    Autoplay,
    User,
    Retry,
}

pub struct RadioController<M: MediaElement> {
    media: M,
    state: PlayerState,
    retry: RetryController,
    autoplay: bool,
    observer: Option<Observer>,
    /// 尚未完成的 `play()`，最多一个；新的加载或用户暂停会将其丢弃
    pending_play: Option<(PlayOrigin, PlayFuture)>,
}

impl<M: MediaElement> RadioController<M> {
    pub fn new(media: M, config: &RadioConfig) -> Self {
        Self {
            media,
            state: PlayerState::new(config.volume),
            retry: RetryController::new(config.retry.policy()),
            autoplay: config.autoplay,
            observer: None,
            pending_play: None,
        }
    }

    pub fn snapshot(&self) -> &PlayerState {
        &self.state
    }

    pub fn pending_retry(&self) -> Option<PendingRetry> {
        self.retry.pending()
    }

    /// 每次状态变化后回调
    pub fn set_observer<F>(&mut self, observer: F)
    where
        F: Fn(&PlayerState) + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    fn notify(&self) {
        if let Some(ref observer) = self.observer {
            observer(&self.state);
        }
    }

    fn commit(&mut self, before: &PlayerState) {
        self.state.retry_count = self.retry.count();
        if self.state != *before {
            self.notify();
        }
    }

    /// 重新加载并发起播放，替换之前未完成的播放
    fn load_and_play(&mut self, origin: PlayOrigin) {
        self.media.load();
        self.pending_play = Some((origin, self.media.play()));
    }

    /// 运行直到收到 [`Command::Quit`] 或命令通道关闭
    ///
    /// `play()` 的结果在循环内等待，等待期间命令与事件照常处理。
    /// 返回时释放事件订阅。
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) {
        let mut events = self.media.subscribe();
        self.start();

        loop {
            let deadline = self.retry.deadline();
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event),
                (origin, result) = wait_play(&mut self.pending_play) => {
                    self.finish_play(origin, result)
                }
                _ = sleep_until(deadline) => self.fire_retry(),
                command = commands.recv() => match command {
                    Some(Command::Quit) | None => break,
                    Some(command) => self.execute(command),
                },
            }
        }

        self.pending_play = None;
        self.retry.cancel();
        info!("radio controller stopped");
    }

    /// 启动时尝试自动播放
    pub fn start(&mut self) {
        let before = self.state.clone();
        self.media.set_volume(self.state.volume);

        if self.autoplay {
            self.load_and_play(PlayOrigin::Autoplay);
        } else {
            info!("autoplay disabled, waiting for the user to start playback");
            self.state.autoplay_blocked = true;
            self.state.status = PlaybackStatus::Ready;
        }
        self.commit(&before);
    }

    pub fn execute(&mut self, command: Command) {
        match command {
            Command::TogglePlay => self.toggle_play(),
            Command::SetVolume(volume) => self.set_volume(volume),
            Command::VolumeUp => self.set_volume(self.state.volume + VOLUME_STEP),
            Command::VolumeDown => self.set_volume(self.state.volume - VOLUME_STEP),
            Command::ToggleMute => self.toggle_mute(),
            Command::ShowStatus => self.notify(),
            Command::Quit => {}
        }
    }

    /// 处理一个媒体事件
    pub fn handle_event(&mut self, event: PlayerEvent) {
        debug!(event = event.name(), "media event");
        let before = self.state.clone();
        let paused_by_user = before.status == PlaybackStatus::Paused;
        self.state.apply(&event);
        let now = Instant::now();

        match event {
            PlayerEvent::Error { code } => {
                warn!(code = code.code(), "media error");
                self.on_failure(RetryReason::Error, now);
            }
            PlayerEvent::Stalled if !paused_by_user => self.on_failure(RetryReason::Stalled, now),
            PlayerEvent::Ended if !paused_by_user => {
                let delay = self.retry.on_ended(now);
                info!(?delay, "stream ended, resuming");
            }
            _ => {}
        }
        self.commit(&before);
    }

    fn on_failure(&mut self, reason: RetryReason, now: Instant) {
        match self.retry.on_failure(reason, now) {
            RetryDecision::Scheduled { attempt, delay } => {
                warn!(?reason, attempt, ?delay, "stream interrupted, reconnect scheduled");
                self.state.status = PlaybackStatus::Reconnecting;
            }
            RetryDecision::Exhausted => {
                error!(
                    max_retries = self.retry.policy().max_retries,
                    "reconnect attempts exhausted"
                );
                self.state.status = PlaybackStatus::Error;
                self.state.message = Some(MSG_RETRY_EXHAUSTED);
                self.state.playing = false;
            }
        }
    }

    /// 处理一次 `play()` 的结果
    ///
    /// 重连发起的播放被拒绝只记录日志，真正的失败由媒体资源的 error 事件驱动下一次重试。
    fn finish_play(&mut self, origin: PlayOrigin, result: Result<(), PlayError>) {
        let e = match result {
            Ok(()) => return,
            // 已被新的加载取代
            Err(PlayError::Aborted) => {
                debug!(?origin, "play superseded");
                return;
            }
            Err(e) => e,
        };
        if origin == PlayOrigin::Retry {
            debug!("reconnect play rejected: {}", e);
            return;
        }

        let before = self.state.clone();
        self.state.playing = false;
        if let PlayError::NotAllowed(_) = e {
            info!(?origin, "playback blocked: {}", e);
            self.state.autoplay_blocked = true;
            self.state.status = PlaybackStatus::Ready;
            if origin == PlayOrigin::User {
                self.state.message = Some(play_rejection_message(&e));
            }
        } else {
            warn!(?origin, "play rejected: {}", e);
            self.state.message = Some(match origin {
                PlayOrigin::Autoplay => MSG_PLAY_NETWORK,
                _ => play_rejection_message(&e),
            });
            // error 事件已安排重连时保持 reconnecting
            if self.retry.pending().is_none() {
                self.state.status = PlaybackStatus::Error;
            }
        }
        self.commit(&before);
    }

    /// 到期时执行待定的重连
    pub fn fire_retry(&mut self) {
        let Some(pending) = self.retry.take_due(Instant::now()) else {
            return;
        };
        info!(reason = ?pending.reason, attempt = self.retry.count(), "reconnecting");
        self.load_and_play(PlayOrigin::Retry);
    }

    pub fn toggle_play(&mut self) {
        let before = self.state.clone();

        // 播放中，或正在等待播放开始
        if self.state.playing || self.pending_play.is_some() {
            self.pending_play = None;
            self.media.pause();
            self.retry.cancel();
            self.state.playing = false;
            self.state.status = PlaybackStatus::Paused;
            self.commit(&before);
            return;
        }

        // 用户播放总是重新连接
        self.retry.reset();
        self.load_and_play(PlayOrigin::User);
        self.commit(&before);
    }

    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        let before = self.state.clone();
        let volume = volume.clamp(0.0, 1.0);
        if volume > 0.0 {
            self.state.saved_volume = volume;
        }
        self.state.volume = volume;
        self.state.muted = volume == 0.0;
        self.media.set_volume(volume);
        self.commit(&before);
    }

    pub fn toggle_mute(&mut self) {
        let before = self.state.clone();
        if self.state.muted {
            self.state.volume = self.state.saved_volume;
            self.state.muted = false;
        } else {
            self.state.saved_volume = self.state.volume;
            self.state.volume = 0.0;
            self.state.muted = true;
        }
        self.media.set_volume(self.state.volume);
        self.commit(&before);
    }
}

/// 等待未完成的播放；没有时永不完成。被 `select!` 取消时播放保留在原处
async fn wait_play(
    pending: &mut Option<(PlayOrigin, PlayFuture)>,
) -> (PlayOrigin, Result<(), PlayError>) {
    let Some((origin, play)) = pending.as_mut() else {
        return std::future::pending().await;
    };
    let origin = *origin;
    let result = play.await;
    *pending = None;
    (origin, result)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::error::MediaErrorCode;
    use crate::status::{MSG_NETWORK, MSG_PLAY_BLOCKED, MSG_PLAY_UNSUPPORTED};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct FakeShared {
        tx: Option<mpsc::UnboundedSender<PlayerEvent>>,
        play_results: VecDeque<Result<(), PlayError>>,
        /// 每次 `play()` 在完成前等待的时间
        play_delay: Option<Duration>,
        loads: u32,
        plays: u32,
        /// 已完成（未被丢弃）的 `play()` 次数
        completed_plays: u32,
        pauses: u32,
        volumes: Vec<f32>,
    }

    fn send(shared: &RefCell<FakeShared>, event: PlayerEvent) {
        if let Some(tx) = shared.borrow().tx.as_ref() {
            let _ = tx.send(event);
        }
    }

    #[derive(Clone, Default)]
    struct FakeElement {
        shared: Rc<RefCell<FakeShared>>,
    }

    impl FakeElement {
        fn emit(&self, event: PlayerEvent) {
            send(&self.shared, event);
        }

        fn push_play_result(&self, result: Result<(), PlayError>) {
            self.shared.borrow_mut().play_results.push_back(result);
        }

        fn set_play_delay(&self, delay: Duration) {
            self.shared.borrow_mut().play_delay = Some(delay);
        }

        fn loads(&self) -> u32 {
            self.shared.borrow().loads
        }

        fn plays(&self) -> u32 {
            self.shared.borrow().plays
        }

        fn completed_plays(&self) -> u32 {
            self.shared.borrow().completed_plays
        }

        fn volume(&self) -> f32 {
            self.shared.borrow().volumes.last().copied().unwrap_or(1.0)
        }
    }

    impl MediaElement for FakeElement {
        fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PlayerEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.shared.borrow_mut().tx = Some(tx);
            rx
        }

        fn load(&mut self) {
            self.shared.borrow_mut().loads += 1;
            self.emit(PlayerEvent::LoadStart);
        }

        fn play(&mut self) -> PlayFuture {
            let shared = self.shared.clone();
            let delay = {
                let mut shared = shared.borrow_mut();
                shared.plays += 1;
                shared.play_delay
            };
            Box::pin(async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let result = {
                    let mut shared = shared.borrow_mut();
                    shared.completed_plays += 1;
                    shared.play_results.pop_front().unwrap_or(Ok(()))
                };
                if result.is_ok() {
                    send(&shared, PlayerEvent::Play);
                    send(&shared, PlayerEvent::Playing);
                }
                result
            })
        }

        fn pause(&mut self) {
            self.shared.borrow_mut().pauses += 1;
            self.emit(PlayerEvent::Pause);
        }

        fn set_volume(&mut self, volume: f32) {
            self.shared.borrow_mut().volumes.push(volume);
            self.emit(PlayerEvent::VolumeChange);
        }
    }

    /// 等待未完成的播放并处理其结果
    async fn settle(controller: &mut RadioController<FakeElement>) {
        let (origin, result) = wait_play(&mut controller.pending_play).await;
        controller.finish_play(origin, result);
    }

    fn config(autoplay: bool) -> RadioConfig {
        RadioConfig {
            autoplay,
            ..RadioConfig::default()
        }
    }

    fn setup(autoplay: bool) -> (RadioController<FakeElement>, FakeElement) {
        let fake = FakeElement::default();
        (RadioController::new(fake.clone(), &config(autoplay)), fake)
    }

    fn network_error() -> PlayerEvent {
        PlayerEvent::Error {
            code: MediaErrorCode::Network,
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("p"), Some(Command::TogglePlay));
        assert_eq!(Command::parse(" "), Some(Command::TogglePlay));
        assert_eq!(Command::parse("+"), Some(Command::VolumeUp));
        assert_eq!(Command::parse("-"), Some(Command::VolumeDown));
        assert_eq!(Command::parse("v 0.3"), Some(Command::SetVolume(0.3)));
        assert_eq!(Command::parse("v loud"), None);
        assert_eq!(Command::parse("m"), Some(Command::ToggleMute));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
        assert_eq!(Command::parse("dance"), None);
    }

    #[tokio::test]
    async fn test_autoplay_disabled_starts_blocked() {
        let (mut controller, fake) = setup(false);
        controller.start();

        assert!(controller.snapshot().autoplay_blocked);
        assert_eq!(controller.snapshot().status, PlaybackStatus::Ready);
        assert_eq!(fake.loads(), 0);
    }

    #[tokio::test]
    async fn test_autoplay_rejection_is_classified() {
        let (mut controller, fake) = setup(true);
        fake.push_play_result(Err(PlayError::NotAllowed("no output".into())));
        controller.start();
        settle(&mut controller).await;
        assert!(controller.snapshot().autoplay_blocked);
        assert_eq!(controller.snapshot().message, None);

        let (mut controller, fake) = setup(true);
        fake.push_play_result(Err(PlayError::Network("refused".into())));
        controller.start();
        settle(&mut controller).await;
        assert!(!controller.snapshot().autoplay_blocked);
        assert_eq!(controller.snapshot().status, PlaybackStatus::Error);
        assert_eq!(controller.snapshot().message, Some(MSG_PLAY_NETWORK));
    }

    #[tokio::test]
    async fn test_user_play_after_autoplay_block() {
        let (mut controller, fake) = setup(false);
        let history = Rc::new(RefCell::new(Vec::new()));
        let record = history.clone();
        controller.set_observer(move |state| record.borrow_mut().push(state.status));

        let (tx, rx) = mpsc::channel(4);
        tx.send(Command::TogglePlay).await.unwrap();
        tx.send(Command::Quit).await.unwrap();
        controller.run(rx).await;

        assert_eq!(
            *history.borrow(),
            vec![
                PlaybackStatus::Ready,
                PlaybackStatus::Connecting,
                PlaybackStatus::Playing
            ]
        );
        assert!(!controller.snapshot().autoplay_blocked);
        assert_eq!(controller.snapshot().message, None);
        assert_eq!(fake.loads(), 1);
    }

    #[tokio::test]
    async fn test_toggle_pauses_when_playing() {
        let (mut controller, fake) = setup(true);
        controller.start();
        settle(&mut controller).await;
        controller.handle_event(PlayerEvent::Playing);
        assert!(controller.snapshot().playing);

        controller.toggle_play();
        assert!(!controller.snapshot().playing);
        assert_eq!(controller.snapshot().status, PlaybackStatus::Paused);
        assert_eq!(fake.shared.borrow().pauses, 1);
        assert_eq!(fake.loads(), 1);
    }

    #[tokio::test]
    async fn test_play_rejection_messages() {
        let (mut controller, fake) = setup(false);
        fake.push_play_result(Err(PlayError::NotSupported("ogg".into())));
        controller.toggle_play();
        settle(&mut controller).await;
        assert_eq!(controller.snapshot().status, PlaybackStatus::Error);
        assert_eq!(controller.snapshot().message, Some(MSG_PLAY_UNSUPPORTED));

        fake.push_play_result(Err(PlayError::NotAllowed("device busy".into())));
        controller.toggle_play();
        settle(&mut controller).await;
        assert_eq!(controller.snapshot().status, PlaybackStatus::Ready);
        assert!(controller.snapshot().autoplay_blocked);
        assert_eq!(controller.snapshot().message, Some(MSG_PLAY_BLOCKED));
    }

    #[test]
    fn test_set_volume_drives_mute() {
        let (mut controller, fake) = setup(true);
        controller.set_volume(0.0);
        assert!(controller.snapshot().muted);

        controller.set_volume(0.6);
        assert!(!controller.snapshot().muted);
        assert_eq!(controller.snapshot().volume, 0.6);

        controller.set_volume(1.7);
        assert_eq!(controller.snapshot().volume, 1.0);
        controller.set_volume(f32::NAN);
        assert_eq!(controller.snapshot().volume, 1.0);

        assert_eq!(fake.shared.borrow().volumes, vec![0.0, 0.6, 1.0]);
    }

    #[test]
    fn test_mute_round_trip_restores_volume() {
        let (mut controller, fake) = setup(true);
        controller.set_volume(0.37);

        controller.toggle_mute();
        assert!(controller.snapshot().muted);
        assert_eq!(controller.snapshot().volume, 0.0);
        assert_eq!(fake.volume(), 0.0);

        controller.toggle_mute();
        assert!(!controller.snapshot().muted);
        assert_eq!(controller.snapshot().volume, 0.37);
        assert_eq!(fake.volume(), 0.37);
    }

    #[test]
    fn test_unmute_after_zero_volume_restores_last_level() {
        let (mut controller, _fake) = setup(true);
        controller.set_volume(0.8);
        controller.set_volume(0.0);
        controller.toggle_mute();
        assert_eq!(controller.snapshot().volume, 0.8);
        assert!(!controller.snapshot().muted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_back_off_then_give_up() {
        let (mut controller, fake) = setup(true);
        controller.start();
        settle(&mut controller).await;
        controller.handle_event(PlayerEvent::Playing);

        for attempt in 1..=3u32 {
            let now = Instant::now();
            controller.handle_event(network_error());
            assert_eq!(controller.snapshot().status, PlaybackStatus::Reconnecting);
            assert_eq!(controller.snapshot().message, Some(MSG_NETWORK));
            assert_eq!(controller.snapshot().retry_count, attempt);

            let pending = controller.pending_retry().expect("retry scheduled");
            assert_eq!(
                pending.deadline - now,
                Duration::from_millis(2000 * attempt as u64)
            );

            tokio::time::advance(pending.deadline - now).await;
            controller.fire_retry();
            settle(&mut controller).await;
            assert_eq!(fake.loads(), 1 + attempt);
        }

        controller.handle_event(network_error());
        assert_eq!(controller.snapshot().status, PlaybackStatus::Error);
        assert_eq!(controller.snapshot().message, Some(MSG_RETRY_EXHAUSTED));
        assert_eq!(controller.snapshot().retry_count, 3);
        assert!(controller.pending_retry().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_always_schedules_single_retry() {
        let (mut controller, fake) = setup(true);
        controller.start();
        settle(&mut controller).await;
        for _ in 0..3 {
            controller.handle_event(network_error());
        }
        controller.handle_event(PlayerEvent::Playing);
        assert_eq!(controller.snapshot().retry_count, 3);

        let now = Instant::now();
        controller.handle_event(PlayerEvent::Ended);
        let pending = controller.pending_retry().expect("retry scheduled");
        assert_eq!(pending.reason, RetryReason::Ended);
        assert_eq!(pending.deadline - now, Duration::from_millis(2000));
        assert_eq!(controller.snapshot().retry_count, 3);
        assert_eq!(controller.snapshot().status, PlaybackStatus::Playing);

        tokio::time::advance(Duration::from_millis(1999)).await;
        controller.fire_retry();
        assert_eq!(fake.loads(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        controller.fire_retry();
        assert_eq!(fake.loads(), 2);
        assert!(controller.pending_retry().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_play_cancels_pending_retry() {
        let (mut controller, fake) = setup(true);
        controller.start();
        settle(&mut controller).await;
        controller.handle_event(network_error());
        controller.handle_event(network_error());
        assert!(controller.pending_retry().is_some());

        controller.toggle_play();
        assert!(controller.pending_retry().is_none());
        assert_eq!(controller.snapshot().retry_count, 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        controller.fire_retry();
        assert_eq!(fake.loads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_retry_play_is_swallowed() {
        let (mut controller, fake) = setup(true);
        controller.start();
        settle(&mut controller).await;
        controller.handle_event(network_error());

        fake.push_play_result(Err(PlayError::Network("refused".into())));
        tokio::time::advance(Duration::from_millis(2000)).await;
        controller.fire_retry();
        settle(&mut controller).await;

        assert_eq!(fake.plays(), 2);
        assert_eq!(controller.snapshot().retry_count, 1);
        assert_eq!(controller.snapshot().message, Some(MSG_NETWORK));
        assert!(controller.pending_retry().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_while_paused_is_ignored() {
        let (mut controller, _fake) = setup(true);
        controller.start();
        settle(&mut controller).await;
        controller.handle_event(PlayerEvent::Playing);
        controller.toggle_play();

        controller.handle_event(PlayerEvent::Stalled);
        assert!(controller.pending_retry().is_none());
        assert_eq!(controller.snapshot().status, PlaybackStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_fires_retry_timer() {
        let (mut controller, fake) = setup(true);
        let (tx, rx) = mpsc::channel(4);

        let script = {
            let fake = fake.clone();
            async move {
                tokio::task::yield_now().await;
                fake.emit(network_error());
                tokio::time::sleep(Duration::from_millis(2100)).await;
                let loads = fake.loads();
                tx.send(Command::Quit).await.unwrap();
                loads
            }
        };

        let ((), loads) = tokio::join!(controller.run(rx), script);
        assert_eq!(loads, 2);
        assert_eq!(controller.snapshot().status, PlaybackStatus::Playing);
        assert_eq!(controller.snapshot().retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_handled_while_play_pending() {
        let (mut controller, fake) = setup(true);
        fake.set_play_delay(Duration::from_secs(10));
        let started = Instant::now();
        let muted_at = Rc::new(RefCell::new(None));
        let record = muted_at.clone();
        controller.set_observer(move |state| {
            if state.muted && record.borrow().is_none() {
                *record.borrow_mut() = Some(Instant::now());
            }
        });

        let (tx, rx) = mpsc::channel(4);
        let script = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(Command::ToggleMute).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(Command::Quit).await.unwrap();
        };
        tokio::join!(controller.run(rx), script);

        let muted_at = muted_at.borrow().expect("mute applied");
        assert!(muted_at - started < Duration::from_secs(1));
        assert!(controller.snapshot().muted);
        assert_eq!(controller.snapshot().status, PlaybackStatus::Connecting);
        assert_eq!(fake.completed_plays(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_drops_pending_play() {
        let (mut controller, fake) = setup(true);
        fake.set_play_delay(Duration::from_secs(10));

        let (tx, rx) = mpsc::channel(4);
        let script = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(Command::TogglePlay).await.unwrap();
            tokio::time::sleep(Duration::from_secs(11)).await;
            tx.send(Command::Quit).await.unwrap();
        };
        tokio::join!(controller.run(rx), script);

        assert_eq!(controller.snapshot().status, PlaybackStatus::Paused);
        assert!(!controller.snapshot().playing);
        assert_eq!(fake.plays(), 1);
        assert_eq!(fake.completed_plays(), 0);
        assert_eq!(fake.loads(), 1);
    }

    #[tokio::test]
    async fn test_superseded_play_is_ignored() {
        let (mut controller, _fake) = setup(false);
        controller.start();
        let before = controller.snapshot().clone();

        controller.finish_play(PlayOrigin::User, Err(PlayError::Aborted));
        assert_eq!(*controller.snapshot(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoplay_failure_keeps_scheduled_reconnect() {
        let (mut controller, fake) = setup(true);
        fake.push_play_result(Err(PlayError::Network("refused".into())));
        controller.start();
        controller.handle_event(network_error());
        settle(&mut controller).await;

        assert_eq!(controller.snapshot().status, PlaybackStatus::Reconnecting);
        assert_eq!(controller.snapshot().message, Some(MSG_PLAY_NETWORK));
        assert!(controller.pending_retry().is_some());
    }
}
