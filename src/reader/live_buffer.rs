use bytes::Bytes;
use std::collections::VecDeque;
use std::io::{Read, Result, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::AppendableDataWrapper;
use crate::events::PlayerEvent;

/// 等待数据时的轮询间隔，用于及时响应取消
const WAIT_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct Inner {
    chunks: VecDeque<Bytes>,
    /// 队首块中已读取的字节数
    front_offset: usize,
    /// 尚未读取的字节数
    buffered: usize,
    completed: bool,
    failed: bool,
    dropped_bytes: u64,
}

fn lock(data: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    data.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 直播流缓冲区
///
/// 与文件下载不同，直播流没有终点，已读取的块会被立即释放；
/// 缓存量超过上限时丢弃最旧的数据。
#[derive(Debug, Clone)]
pub struct LiveBuffer {
    data: Arc<Mutex<Inner>>,
    condvar: Arc<Condvar>,
    max_buffered: usize,
}

impl LiveBuffer {
    pub fn new(max_buffered: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(Inner::default())),
            condvar: Arc::new(Condvar::new()),
            max_buffered,
        }
    }

    pub fn buffered(&self) -> usize {
        lock(&self.data).buffered
    }

    pub fn dropped_bytes(&self) -> u64 {
        lock(&self.data).dropped_bytes
    }

    /// 流是否因错误结束
    pub fn is_failed(&self) -> bool {
        lock(&self.data).failed
    }

    pub fn reader(&self, cancellation_token: CancellationToken) -> LiveReader {
        LiveReader {
            data: self.data.clone(),
            condvar: self.condvar.clone(),
            pos: 0,
            waiting: false,
            playback_started: Arc::new(AtomicBool::new(false)),
            cancellation_token,
            callback: None,
        }
    }
}

impl AppendableDataWrapper for LiveBuffer {
    fn append_chunk(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        let mut inner = lock(&self.data);
        if inner.completed {
            return;
        }
        inner.buffered += chunk.len();
        inner.chunks.push_back(chunk);

        // 超出上限，丢弃最旧的块（至少保留刚加入的块）
        while inner.buffered > self.max_buffered && inner.chunks.len() > 1 {
            if let Some(front) = inner.chunks.pop_front() {
                let remaining = front.len() - inner.front_offset;
                inner.buffered -= remaining;
                inner.dropped_bytes += remaining as u64;
                inner.front_offset = 0;
            }
        }
        drop(inner);
        // 获取到数据后，解除Reader对缓冲区数据的等待
        self.condvar.notify_all();
    }

    fn complete(&mut self) {
        lock(&self.data).completed = true;
        self.condvar.notify_all();
    }

    fn fail(&mut self) {
        let mut inner = lock(&self.data);
        inner.completed = true;
        inner.failed = true;
        drop(inner);
        self.condvar.notify_all();
    }
}

/// 从 [`LiveBuffer`] 顺序读取数据，供解码器使用
///
/// 缓冲区为空时阻塞等待；流结束或播放被取消时返回 EOF。
pub struct LiveReader {
    data: Arc<Mutex<Inner>>,
    condvar: Arc<Condvar>,
    pos: u64,
    waiting: bool,
    playback_started: Arc<AtomicBool>,
    cancellation_token: CancellationToken,
    callback: Option<Box<dyn Fn(PlayerEvent) + Send + Sync + 'static>>,
}

impl LiveReader {
    /// 设置缓冲事件回调（waiting / playing）
    ///
    /// 只有在 [`LiveReader::playback_started`] 被置位后才会触发，
    /// 避免解码器探测阶段的等待被当作播放中的缓冲。
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: Fn(PlayerEvent) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    pub fn playback_started(&self) -> Arc<AtomicBool> {
        self.playback_started.clone()
    }

    fn emit(&self, event: PlayerEvent) {
        if !self.playback_started.load(Ordering::Acquire) {
            return;
        }
        if let Some(ref cb) = self.callback {
            cb(event);
        }
    }
}

impl Read for LiveReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut inner = lock(&self.data);

        while inner.buffered == 0 {
            if inner.completed || self.cancellation_token.is_cancelled() {
                return Ok(0);
            }
            if !self.waiting {
                self.waiting = true;
                self.emit(PlayerEvent::Waiting);
            }
            inner = self
                .condvar
                .wait_timeout(inner, WAIT_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let mut written = 0;
        while written < buf.len() {
            let offset = inner.front_offset;
            let Some(front) = inner.chunks.front() else {
                break;
            };
            let available = &front[offset..];
            let len = available.len().min(buf.len() - written);
            buf[written..written + len].copy_from_slice(&available[..len]);
            let front_len = front.len();
            written += len;

            if offset + len == front_len {
                inner.chunks.pop_front();
                inner.front_offset = 0;
            } else {
                inner.front_offset += len;
            }
            inner.buffered -= len;
        }
        drop(inner);

        if self.waiting {
            self.waiting = false;
            self.emit(PlayerEvent::Playing);
        }
        self.pos += written as u64;
        Ok(written)
    }
}

impl Seek for LiveReader {
    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        // 直播流不可跳转，仅支持查询当前位置
        match pos {
            SeekFrom::Current(0) => Ok(self.pos),
            SeekFrom::Start(p) if p == self.pos => Ok(self.pos),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "live stream is not seekable",
            )),
        }
    }
}
