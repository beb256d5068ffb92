// 视频优化钩子
//
// 超过压缩阈值的文件在上传前交给优化器处理，默认实现原样返回

use crate::uploader::{FileHandle, UploadError};
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait VideoOptimizer: Send + Sync {
    /// 返回实际要上传的文件
    async fn optimize(&self, file: FileHandle) -> Result<FileHandle, UploadError>;
}

/// 不做任何处理
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughOptimizer;

#[async_trait]
impl VideoOptimizer for PassthroughOptimizer {
    async fn optimize(&self, file: FileHandle) -> Result<FileHandle, UploadError> {
        debug!("跳过视频优化: file={}, size={}", file.name(), file.size());
        Ok(file)
    }
}
