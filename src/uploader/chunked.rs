// 分片上传
//
// 三阶段协议：
// 1. init: 服务端创建会话并返回每个分片的预签名 URL
// 2. 逐个分片 PUT 到对象存储，成功后上报分片状态
// 3. complete: 所有分片都已记录后通知服务端合并
//
// 分片严格串行，同一时间内存中只有一个分片的数据

use crate::api::{InitUploadRequest, UploadTransport};
use crate::uploader::progress::{chunked_progress, INIT_PROGRESS};
use crate::uploader::retry::{self, ensure_active, RetryPolicy};
use crate::uploader::{
    FileHandle, PartResult, ProgressReporter, UploadError, UploadPartManager, UploadPlan,
    UploadSession, UploadState, UploadTarget,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 存储端未返回 ETag 时生成的占位符长度
const PLACEHOLDER_ETAG_LEN: usize = 16;

/// 单次分片上传的运行状态
#[derive(Debug)]
pub struct ChunkedUpload {
    state: UploadState,
    parts: UploadPartManager,
    session: Option<UploadSession>,
}

impl ChunkedUpload {
    pub fn new(file_size: u64, plan: &UploadPlan) -> Self {
        Self {
            state: UploadState::Idle,
            parts: UploadPartManager::new(file_size, plan.chunk_size),
            session: None,
        }
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn parts(&self) -> &UploadPartManager {
        &self.parts
    }

    /// init 成功后服务端分配的 upload_id
    pub fn upload_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.upload_id.as_str())
    }

    /// 只有所有分片都记录了结果才允许进入 complete 阶段
    fn ensure_all_parts_recorded(&self) -> Result<(), UploadError> {
        if self.parts.is_completed() {
            let results = self.parts.part_results();
            debug!(
                "分片已全部记录: {:?}",
                results
                    .iter()
                    .map(|r| (r.part_number, r.etag.as_str()))
                    .collect::<Vec<_>>()
            );
            return Ok(());
        }
        Err(UploadError::IncompleteParts {
            recorded: self.parts.completed_count() as u32,
            expected: self.parts.part_count(),
        })
    }

    fn transition(&mut self, next: UploadState, reporter: &ProgressReporter) {
        if !self.state.can_transition_to(next) {
            warn!("忽略非法状态迁移: {:?} -> {:?}", self.state, next);
            return;
        }
        debug!("分片上传状态: {:?} -> {:?}", self.state, next);
        self.state = next;
        reporter.state(next);
    }
}

pub struct ChunkedUploadStrategy {
    transport: Arc<dyn UploadTransport>,
    policy: RetryPolicy,
}

impl ChunkedUploadStrategy {
    pub fn new(transport: Arc<dyn UploadTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// 执行分片上传，结束时 `upload` 处于 Done / Failed / Cancelled 之一
    pub async fn execute(
        &self,
        upload: &mut ChunkedUpload,
        file: &FileHandle,
        target: &UploadTarget,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Value, UploadError> {
        let result = self.run(upload, file, target, reporter, cancel).await;

        let terminal = match &result {
            Ok(_) => UploadState::Done,
            Err(e) if e.is_cancelled() => UploadState::Cancelled,
            Err(_) => UploadState::Failed,
        };
        upload.transition(terminal, reporter);
        result
    }

    async fn run(
        &self,
        upload: &mut ChunkedUpload,
        file: &FileHandle,
        target: &UploadTarget,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Value, UploadError> {
        ensure_active(cancel)?;
        upload.transition(UploadState::Initializing, reporter);

        let req = InitUploadRequest {
            course_id: target.course_id,
            lecture_id: target.lecture_id,
            file_size: file.size(),
            file_type: file.mime_type().to_string(),
            parts: upload.parts.part_count(),
        };
        let init = self.transport.init_upload(&req).await?;
        upload.session = Some(UploadSession {
            upload_id: init.upload_id,
            presigned_urls: init.presigned_urls,
        });
        ensure_active(cancel)?;

        reporter.report(INIT_PROGRESS);
        upload.transition(UploadState::UploadingParts, reporter);

        for part_number in 1..=upload.parts.part_count() {
            ensure_active(cancel)?;
            self.upload_part(upload, part_number, file, reporter, cancel)
                .await?;
        }

        ensure_active(cancel)?;
        upload.ensure_all_parts_recorded()?;
        upload.transition(UploadState::Completing, reporter);

        let upload_id = upload.upload_id().unwrap_or_default().to_string();
        let body = self.transport.complete_upload(&upload_id).await?;
        ensure_active(cancel)?;

        info!(
            "分片上传完成: upload_id={}, parts={}, size={}",
            upload_id,
            upload.parts.part_count(),
            file.size()
        );
        Ok(body)
    }

    /// 上传单个分片并上报状态
    async fn upload_part(
        &self,
        upload: &mut ChunkedUpload,
        part_number: u32,
        file: &FileHandle,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let session = upload
            .session
            .as_ref()
            .ok_or(UploadError::MissingPresignedUrl(part_number))?;
        let upload_id = session.upload_id.clone();
        let url = session
            .presigned_url(part_number)
            .map(str::to_string)
            .ok_or_else(|| {
                error!("缺少分片 #{} 的预签名 URL", part_number);
                UploadError::MissingPresignedUrl(part_number)
            })?;

        let data = match upload.parts.part(part_number) {
            Some(part) => part.read_data(file).await?,
            None => return Err(UploadError::UnknownPart(part_number)),
        };

        let transport = &self.transport;
        let parts = &mut upload.parts;
        let etag = retry::attempt(&self.policy, cancel, UploadError::is_retryable, |attempt_no| {
            parts.record_attempt(part_number);
            debug!("上传分片 #{} (第 {} 次尝试)", part_number, attempt_no);
            let transport = transport.clone();
            let url = url.clone();
            let data = data.clone();
            async move { transport.put_part(&url, data).await }
        })
        .await
        .map_err(|e| e.into_part_error(part_number))?;
        ensure_active(cancel)?;

        let etag = etag.unwrap_or_else(|| {
            let placeholder = placeholder_etag();
            warn!(
                "分片 #{} 响应中没有 ETag，使用占位符: {}",
                part_number, placeholder
            );
            placeholder
        });

        let result = PartResult { part_number, etag };
        let status = self.transport.report_part(&upload_id, &result).await?;
        ensure_active(cancel)?;

        upload.parts.mark_completed(part_number, result.etag);
        reporter.report(chunked_progress(
            upload.parts.uploaded_bytes(),
            upload.parts.total_size(),
        ));

        info!(
            "分片 #{} 上传完成: {}/{} (服务端 {})",
            part_number,
            upload.parts.completed_count(),
            upload.parts.part_count(),
            status.progress
        );
        Ok(())
    }
}

/// 随机字母数字占位 ETag
fn placeholder_etag() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PLACEHOLDER_ETAG_LEN)
        .map(char::from)
        .collect()
}
