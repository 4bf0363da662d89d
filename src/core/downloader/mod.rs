pub mod client;

pub use client::{sha256_file, DownloadStatus, Downloader};
