// 上传协调器
//
// 核心功能：
// 1. 上传前校验文件（空文件、超出大小上限）
// 2. 大文件先交给视频优化钩子
// 3. 按文件大小选择单请求上传或分片上传
// 4. 统一回调约定：on_error / on_success 恰好触发其中一个
//
// 取消：
// - 每次 upload() 创建新的取消令牌，替换上一次的令牌
// - 同一个协调器上不应并发执行多个上传；需要并发时使用 upload_with_token

use crate::api::UploadTransport;
use crate::config::UploadConfig;
use crate::uploader::{
    ChunkedUpload, ChunkedUploadStrategy, FileHandle, PassthroughOptimizer, ProgressReporter,
    StandardUploadStrategy, UploadError, UploadFailure, UploadObserver, UploadPlan,
    UploadStatusClient, UploadStrategy, UploadTarget, VideoOptimizer,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct UploadCoordinator {
    transport: Arc<dyn UploadTransport>,
    config: UploadConfig,
    optimizer: Arc<dyn VideoOptimizer>,
    standard: StandardUploadStrategy,
    chunked: ChunkedUploadStrategy,
    /// 当前上传的取消令牌
    active: Mutex<CancellationToken>,
}

impl UploadCoordinator {
    pub fn new(transport: Arc<dyn UploadTransport>, config: UploadConfig) -> Self {
        let policy = config.retry_policy();
        Self {
            standard: StandardUploadStrategy::new(transport.clone()),
            chunked: ChunkedUploadStrategy::new(transport.clone(), policy),
            transport,
            config,
            optimizer: Arc::new(PassthroughOptimizer),
            active: Mutex::new(CancellationToken::new()),
        }
    }

    /// 替换视频优化钩子
    pub fn with_optimizer(mut self, optimizer: Arc<dyn VideoOptimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// 共享同一传输层的状态查询客户端
    pub fn status_client(&self) -> UploadStatusClient {
        UploadStatusClient::new(self.transport.clone())
    }

    /// 上传文件
    ///
    /// 创建新的取消令牌并替换之前的令牌，之后 `cancel()` 只作用于本次上传
    pub async fn upload(
        &self,
        file: FileHandle,
        target: UploadTarget,
        observer: Arc<dyn UploadObserver>,
    ) -> Result<Value, UploadError> {
        let token = CancellationToken::new();
        *self.active.lock() = token.clone();
        self.upload_with_token(file, target, observer, token).await
    }

    /// 使用调用方提供的取消令牌上传
    pub async fn upload_with_token(
        &self,
        file: FileHandle,
        target: UploadTarget,
        observer: Arc<dyn UploadObserver>,
        cancel: CancellationToken,
    ) -> Result<Value, UploadError> {
        let reporter = Arc::new(ProgressReporter::new(observer.clone()));
        let mut upload_id = None;

        let result = self
            .dispatch(file, &target, &reporter, &cancel, &mut upload_id)
            .await;

        match &result {
            Ok(body) => {
                reporter.report(100);
                observer.on_success(body);
            }
            Err(e) => {
                let failure = UploadFailure::from_error(e, upload_id);
                if failure.is_cancelled() {
                    warn!(
                        "上传已取消: course={}, lecture={}",
                        target.course_id, target.lecture_id
                    );
                } else {
                    error!(
                        "上传失败: course={}, lecture={}, upload_id={:?}, error={}",
                        target.course_id, target.lecture_id, failure.upload_id, failure.message
                    );
                }
                observer.on_error(&failure);
            }
        }
        result
    }

    /// 取消当前上传
    ///
    /// 已发出的请求会完成，但其结果被丢弃；之后不再发出新的请求
    pub fn cancel(&self) {
        info!("请求取消当前上传");
        self.active.lock().cancel();
    }

    async fn dispatch(
        &self,
        file: FileHandle,
        target: &UploadTarget,
        reporter: &Arc<ProgressReporter>,
        cancel: &CancellationToken,
        upload_id: &mut Option<String>,
    ) -> Result<Value, UploadError> {
        self.validate(&file)?;

        let file = if file.size() > self.config.compression_threshold_bytes() {
            info!("文件超过压缩阈值，执行视频优化: size={}", file.size());
            self.optimizer.optimize(file).await?
        } else {
            file
        };

        let plan = UploadPlan::from_config(file.size(), &self.config);
        info!(
            "开始上传: file={}, size={}, mime={}, strategy={:?}, parts={}",
            file.name(),
            file.size(),
            file.mime_type(),
            plan.strategy,
            plan.part_count
        );

        match plan.strategy {
            UploadStrategy::Standard => {
                self.standard
                    .execute(&file, target, reporter, cancel)
                    .await
            }
            UploadStrategy::Chunked => {
                let mut upload = ChunkedUpload::new(file.size(), &plan);
                let result = self
                    .chunked
                    .execute(&mut upload, &file, target, reporter, cancel)
                    .await;
                *upload_id = upload.upload_id().map(str::to_string);
                result
            }
        }
    }

    /// 发起网络请求前的校验
    fn validate(&self, file: &FileHandle) -> Result<(), UploadError> {
        if file.size() == 0 {
            return Err(UploadError::Validation("File is empty".to_string()));
        }
        let max = self.config.max_file_size_bytes();
        if file.size() > max {
            return Err(UploadError::Validation(format!(
                "File size exceeds the {}MB limit",
                max / crate::uploader::chunk::MIB
            )));
        }
        Ok(())
    }
}
