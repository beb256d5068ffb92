// 上传引擎模块
//
// - 小文件：单请求 multipart 上传，按发送字节计算进度
// - 大文件：固定大小分片，init -> 逐片上传（带重试）-> complete
// - 进度、错误、成功统一通过 UploadObserver 回调

pub mod chunk;
pub mod chunked;
pub mod engine;
pub mod error;
pub mod file;
pub mod optimize;
pub mod progress;
pub mod retry;
pub mod standard;
pub mod status;
pub mod task;

#[cfg(test)]
pub(crate) mod mock;

pub use chunk::{
    PartResult, UploadPart, UploadPartManager, UploadPlan, UploadStrategy, COMPRESSION_THRESHOLD,
    DEFAULT_CHUNK_SIZE, MAX_FILE_SIZE, MIN_CHUNK_SIZE, STANDARD_THRESHOLD,
};
pub use chunked::{ChunkedUpload, ChunkedUploadStrategy};
pub use engine::UploadCoordinator;
pub use error::{FailureKind, UploadError, UploadFailure};
pub use file::{FileHandle, DEFAULT_MIME_TYPE};
pub use optimize::{PassthroughOptimizer, VideoOptimizer};
pub use progress::{
    CallbackObserver, ChannelObserver, ProgressReporter, UploadEvent, UploadObserver,
};
pub use retry::RetryPolicy;
pub use standard::StandardUploadStrategy;
pub use status::UploadStatusClient;
pub use task::{UploadSession, UploadState, UploadTarget};
