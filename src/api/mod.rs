// 上传接口模块

pub mod client;
pub mod types;

pub use client::{BytesSentFn, HttpTransport, UploadTransport};
pub use types::*;
