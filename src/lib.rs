// Lecture video upload client
// 课程视频上传客户端核心库

// 认证令牌访问
pub mod auth;

// 配置管理模块
pub mod config;

// 后端上传接口
pub mod api;

// 上传引擎模块
pub mod uploader;

// 日志系统
pub mod logging;

// 导出常用类型
pub use api::{HttpTransport, UploadTransport};
pub use auth::{EnvToken, StaticToken, TokenProvider};
pub use config::AppConfig;
pub use uploader::{
    CallbackObserver, ChannelObserver, FailureKind, FileHandle, UploadCoordinator, UploadError,
    UploadEvent, UploadFailure, UploadObserver, UploadState, UploadStatusClient, UploadTarget,
};
