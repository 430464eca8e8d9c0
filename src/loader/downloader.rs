use futures_util::StreamExt;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DownloadError;
use crate::reader::AppendableDataWrapper;

/// 下载状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    /// 未开始下载
    NotStarted,
    /// 下载中
    Downloading,
    /// 服务端正常关闭了流
    Completed,
    /// 下载中断
    Aborted,
}

/// 下载事件枚举，用于回调函数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadEvent {
    /// 获取到Header
    HeaderReceived,
    /// 收到首个数据块
    FirstChunk,
    /// 超过停滞阈值仍未收到数据（每次停滞只触发一次）
    Stalled,
    /// 服务端关闭了流
    Completed,
    /// 流异常中断
    Failed,
}

/// 响应头中与解码有关的信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    /// 去掉参数后的 Content-Type
    pub content_type: Option<String>,
}

type Callback = Arc<Mutex<Option<Box<dyn Fn(DownloadEvent) + Send + 'static>>>>;

/// 直播流下载器
///
/// 连接成功后在后台任务中持续把数据块写入缓冲区，直到流结束、出错或被取消。
pub struct Downloader {
    /// 下载的数据
    data: Arc<Mutex<Box<dyn AppendableDataWrapper + Send + 'static>>>,
    /// 下载状态
    status: Arc<Mutex<DownloadStatus>>,
    /// 已下载字节数
    downloaded_bytes: Arc<AtomicU64>,
    /// 是否已经调用过download方法
    download_called: AtomicBool,
    connect_timeout: Duration,
    stall_timeout: Duration,
    cancellation_token: CancellationToken,
    /// 下载任务句柄
    task_handle: Mutex<Option<tokio::task::JoinHandle<Result<(), DownloadError>>>>,
    /// 回调函数
    callback: Callback,
}

fn emit(callback: &Callback, event: DownloadEvent) {
    if let Some(ref cb) = *callback.lock().unwrap_or_else(PoisonError::into_inner) {
        cb(event);
    }
}

fn set_status(status: &Mutex<DownloadStatus>, value: DownloadStatus) {
    *status.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

fn parse_content_type(value: &str) -> Option<String> {
    let mime = value.split(';').next()?.trim().to_ascii_lowercase();
    if mime.is_empty() {
        None
    } else {
        Some(mime)
    }
}

impl Downloader {
    /// 创建新的下载器实例
    pub fn new<T: AppendableDataWrapper + Send + 'static>(
        data: T,
        connect_timeout: Duration,
        stall_timeout: Duration,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            data: Arc::new(Mutex::new(Box::new(data))),
            status: Arc::new(Mutex::new(DownloadStatus::NotStarted)),
            downloaded_bytes: Arc::new(AtomicU64::new(0)),
            download_called: AtomicBool::new(false),
            connect_timeout,
            stall_timeout,
            cancellation_token,
            task_handle: Mutex::new(None),
            callback: Arc::new(Mutex::new(None)),
        }
    }

    /// 获取当前下载状态
    pub fn status(&self) -> DownloadStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 获取已下载字节数
    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes.load(Ordering::Relaxed)
    }

    /// 设置消息回调函数
    ///
    /// 多次调用会替换之前设置的回调函数
    pub fn handle_message<F>(&self, callback: F)
    where
        F: Fn(DownloadEvent) + Send + 'static,
    {
        let mut cb = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        *cb = Some(Box::new(callback));
    }

    /// 开始下载
    ///
    /// 请求成功并获取到响应头后立即返回，数据在后台任务中持续写入。
    pub async fn download(
        &self,
        url: &str,
        headers: Option<Vec<(String, String)>>,
    ) -> Result<StreamInfo, DownloadError> {
        if self.download_called.swap(true, Ordering::SeqCst) {
            return Err(DownloadError::AlreadyStarted);
        }
        set_status(&self.status, DownloadStatus::Downloading);

        match self.connect(url, headers).await {
            Ok(info) => Ok(info),
            Err(e) => {
                set_status(&self.status, DownloadStatus::Aborted);
                self.data
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .fail();
                emit(&self.callback, DownloadEvent::Failed);
                Err(e)
            }
        }
    }

    async fn connect(
        &self,
        url: &str,
        headers: Option<Vec<(String, String)>>,
    ) -> Result<StreamInfo, DownloadError> {
        // 直播流没有终点，只能限制连接时间而不能限制总时长
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(DownloadError::Client)?;

        let mut request_builder = client.get(url);
        if let Some(hdrs) = headers {
            for (key, value) in hdrs {
                request_builder = request_builder.header(key, value);
            }
        }

        let response = tokio::select! {
            _ = self.cancellation_token.cancelled() => return Err(DownloadError::Cancelled),
            result = request_builder.send() => result.map_err(DownloadError::Request)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status));
        }

        let info = StreamInfo {
            content_type: response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_type),
        };
        info!(url, content_type = ?info.content_type, "stream connected");
        emit(&self.callback, DownloadEvent::HeaderReceived);

        let data = Arc::clone(&self.data);
        let status = Arc::clone(&self.status);
        let downloaded_bytes = Arc::clone(&self.downloaded_bytes);
        let callback = Arc::clone(&self.callback);
        let token = self.cancellation_token.clone();
        let stall_timeout = self.stall_timeout;

        let handle = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut stalled = false;
            let mut first = true;

            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => {
                        debug!("download cancelled");
                        set_status(&status, DownloadStatus::Aborted);
                        return Err(DownloadError::Cancelled);
                    }
                    next = tokio::time::timeout(stall_timeout, stream.next()) => next,
                };

                match next {
                    Err(_) => {
                        if !stalled {
                            stalled = true;
                            warn!(?stall_timeout, "no data received, stream stalled");
                            emit(&callback, DownloadEvent::Stalled);
                        }
                    }
                    Ok(Some(Ok(chunk))) => {
                        stalled = false;
                        let len = chunk.len() as u64;
                        data.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .append_chunk(chunk);
                        downloaded_bytes.fetch_add(len, Ordering::Relaxed);
                        if first {
                            first = false;
                            emit(&callback, DownloadEvent::FirstChunk);
                        }
                    }
                    Ok(Some(Err(e))) => {
                        warn!("error reading chunk: {}", e);
                        data.lock().unwrap_or_else(PoisonError::into_inner).fail();
                        set_status(&status, DownloadStatus::Aborted);
                        emit(&callback, DownloadEvent::Failed);
                        return Err(DownloadError::Body(e));
                    }
                    Ok(None) => break,
                }
            }

            set_status(&status, DownloadStatus::Completed);
            info!(
                bytes = downloaded_bytes.load(Ordering::Relaxed),
                "stream closed by server"
            );
            emit(&callback, DownloadEvent::Completed);
            // 最后再通知Reader，读到 EOF 时状态已经是 Completed
            data.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .complete();
            Ok(())
        });

        *self
            .task_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(info)
    }

    /// 中断当前下载
    pub fn abort(&self) -> Result<(), DownloadStatus> {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status != DownloadStatus::Downloading {
            return Err(*status);
        }
        self.cancellation_token.cancel();
        if let Some(handle) = self
            .task_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        *status = DownloadStatus::Aborted;
        Ok(())
    }
}

impl Drop for Downloader {
    fn drop(&mut self) {
        let _ = self.abort();
    }
}
