pub mod downloader;

pub use downloader::{DownloadEvent, DownloadStatus, Downloader, StreamInfo};
