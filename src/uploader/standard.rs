// 单请求上传
//
// 整个文件作为 multipart 表单的一部分发送，不重试

use crate::api::{BytesSentFn, UploadTransport};
use crate::uploader::progress::standard_progress;
use crate::uploader::retry::ensure_active;
use crate::uploader::{FileHandle, ProgressReporter, UploadError, UploadTarget};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 响应确认前进度停留的上限
const PENDING_CAP: u8 = 99;

pub struct StandardUploadStrategy {
    transport: Arc<dyn UploadTransport>,
}

impl StandardUploadStrategy {
    pub fn new(transport: Arc<dyn UploadTransport>) -> Self {
        Self { transport }
    }

    /// 执行单请求上传
    ///
    /// 进度按已发送字节计算，在服务端响应之前不会超过 99
    pub async fn execute(
        &self,
        file: &FileHandle,
        target: &UploadTarget,
        reporter: &Arc<ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<Value, UploadError> {
        ensure_active(cancel)?;
        reporter.report(0);

        let total = file.size();
        let progress = reporter.clone();
        let on_sent: BytesSentFn = Arc::new(move |sent| {
            progress.report(standard_progress(sent, total).min(PENDING_CAP));
        });

        let body = self.transport.upload_standard(target, file, on_sent).await?;
        // 请求期间被取消：丢弃结果
        ensure_active(cancel)?;

        info!("单请求上传完成: file={}, size={}", file.name(), total);
        Ok(body)
    }
}
