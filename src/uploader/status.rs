// 上传会话查询与中止
//
// abort 只在调用方显式请求时执行，上传失败不会自动中止会话

use crate::api::{AbortUploadResponse, UploadStatusResponse, UploadTransport};
use crate::uploader::UploadError;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct UploadStatusClient {
    transport: Arc<dyn UploadTransport>,
}

impl UploadStatusClient {
    pub fn new(transport: Arc<dyn UploadTransport>) -> Self {
        Self { transport }
    }

    /// 查询上传会话状态
    pub async fn get_status(&self, upload_id: &str) -> Result<UploadStatusResponse, UploadError> {
        let status = self.transport.upload_status(upload_id).await?;
        info!(
            "上传状态: upload_id={}, status={}, parts={}/{}",
            status.upload_id, status.status, status.parts_received, status.parts_expected
        );
        Ok(status)
    }

    /// 中止上传会话，释放服务端保留的分片
    pub async fn abort(&self, upload_id: &str) -> Result<AbortUploadResponse, UploadError> {
        match self.transport.abort_upload(upload_id).await {
            Ok(resp) => {
                info!("上传已中止: upload_id={}, message={}", upload_id, resp.message);
                Ok(resp)
            }
            Err(e) => {
                warn!("中止上传失败: upload_id={}, error={}", upload_id, e);
                Err(e)
            }
        }
    }
}
