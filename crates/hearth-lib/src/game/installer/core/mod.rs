pub mod downloader;
pub mod patcher;
pub mod traits;
