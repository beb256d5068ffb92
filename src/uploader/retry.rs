// 重试策略
//
// 固定间隔重试，仅用于分片 PUT；初始化/完成/状态查询失败均为致命错误
// 每次尝试前检查取消令牌，等待期间取消立即返回

use crate::uploader::UploadError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// 默认最大尝试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 默认重试间隔（毫秒）
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// 重试配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含第一次）
    pub max_retries: u32,
    /// 两次尝试之间的固定等待
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            delay,
        }
    }
}

/// 重试失败的结果
#[derive(Debug)]
pub enum RetryError {
    /// 尝试次数耗尽，附带最后一次错误
    Exhausted { attempts: u32, last: UploadError },
    /// 不可重试的错误，立即返回
    Fatal(UploadError),
    /// 重试过程中被取消
    Cancelled,
}

impl RetryError {
    /// 转换为上传错误（耗尽时标注分片编号）
    pub fn into_part_error(self, part_number: u32) -> UploadError {
        match self {
            RetryError::Exhausted { attempts, last } => UploadError::PartExhausted {
                part_number,
                attempts,
                last: Box::new(last),
            },
            RetryError::Fatal(e) => e,
            RetryError::Cancelled => UploadError::Cancelled,
        }
    }
}

/// 已取消时返回 `UploadError::Cancelled`
///
/// 在每个网络边界之前以及每个响应返回之后调用
pub fn ensure_active(cancel: &CancellationToken) -> Result<(), UploadError> {
    if cancel.is_cancelled() {
        Err(UploadError::Cancelled)
    } else {
        Ok(())
    }
}

/// 按策略执行操作
///
/// # 参数
/// * `policy` - 重试配置
/// * `cancel` - 取消令牌，每次尝试前检查
/// * `is_retryable` - 判断错误是否可重试
/// * `op` - 操作，参数为当前尝试序号（从 1 开始）
pub async fn attempt<T, F, Fut, R>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_retryable: R,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, UploadError>>,
    R: Fn(&UploadError) -> bool,
{
    let max = policy.max_retries.max(1);
    let mut attempt_no = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match op(attempt_no).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() => return Err(RetryError::Cancelled),
            Err(e) if !is_retryable(&e) => return Err(RetryError::Fatal(e)),
            Err(e) if attempt_no >= max => {
                return Err(RetryError::Exhausted {
                    attempts: attempt_no,
                    last: e,
                })
            }
            Err(e) => {
                warn!(
                    "第 {}/{} 次尝试失败，{}ms 后重试: {}",
                    attempt_no,
                    max,
                    policy.delay.as_millis(),
                    e
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(policy.delay) => {}
                }
                attempt_no += 1;
            }
        }
    }
}
