// 上传错误定义
//
// 错误分类：
// - 校验错误：发起任何网络请求之前拒绝
// - 传输错误：网络失败 / 超时，仅分片 PUT 可重试
// - 协议错误：已知端点返回非 2xx，仅分片 PUT 可重试
// - 完整性缺口：缺少预签名 URL、分片未全部记录（致命）
// - 取消：与失败区分，调用方可据此不展示"失败"状态

use serde::Serialize;
use thiserror::Error;

/// 上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 文件校验失败（空文件、超出大小上限等）
    #[error("{0}")]
    Validation(String),

    /// 网络层失败
    #[error("Network error during {context}: {message}")]
    Transport {
        context: String,
        message: String,
        timeout: bool,
    },

    /// 服务端返回非 2xx
    #[error("{context}: {status} {status_text}{}", body_suffix(.body))]
    Protocol {
        context: String,
        status: u16,
        status_text: String,
        body: String,
    },

    /// 单请求上传被服务端拒绝（响应体只记录在日志中）
    #[error("Upload failed with status {status}: {status_text}")]
    UploadRejected {
        status: u16,
        status_text: String,
        body: String,
    },

    /// 初始化响应中缺少某个分片的预签名 URL
    #[error("Missing presigned URL for part {0}")]
    MissingPresignedUrl(u32),

    /// 分片编号不在上传计划内
    #[error("Part {0} is not part of the upload plan")]
    UnknownPart(u32),

    /// 提交前仍有分片没有记录结果
    #[error("Cannot complete upload: {recorded} of {expected} parts recorded")]
    IncompleteParts { recorded: u32, expected: u32 },

    /// 分片重试次数耗尽
    #[error("Failed to upload part {part_number} after {attempts} attempts: {last}")]
    PartExhausted {
        part_number: u32,
        attempts: u32,
        #[source]
        last: Box<UploadError>,
    },

    /// 服务端响应无法解析
    #[error("Invalid response from server")]
    InvalidResponse(#[source] serde_json::Error),

    /// 读取本地文件失败
    #[error("Failed to read upload file: {0}")]
    Io(#[from] std::io::Error),

    /// 用户取消
    #[error("Upload cancelled")]
    Cancelled,
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(" - {}", body)
    }
}

impl UploadError {
    /// 创建传输错误
    pub fn transport(context: impl Into<String>, err: &reqwest::Error) -> Self {
        UploadError::Transport {
            context: context.into(),
            message: err.to_string(),
            timeout: err.is_timeout(),
        }
    }

    /// 是否可重试（仅分片 PUT 使用此判定）
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Transport { .. } | UploadError::Protocol { .. }
        )
    }

    /// 是否为用户取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }

    /// 错误类别
    pub fn kind(&self) -> FailureKind {
        match self {
            UploadError::Validation(_) => FailureKind::Validation,
            UploadError::Transport { .. } => FailureKind::Transport,
            UploadError::Protocol { .. }
            | UploadError::UploadRejected { .. }
            | UploadError::InvalidResponse(_) => FailureKind::Protocol,
            UploadError::MissingPresignedUrl(_)
            | UploadError::UnknownPart(_)
            | UploadError::IncompleteParts { .. } => FailureKind::Integrity,
            UploadError::PartExhausted { last, .. } => last.kind(),
            UploadError::Io(_) => FailureKind::Io,
            UploadError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// 失败类别（跨越组件边界的标签）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Transport,
    Protocol,
    Integrity,
    Io,
    Cancelled,
}

/// 交给 `on_error` 的规范化失败信息
///
/// 不携带任何原始传输层错误对象
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadFailure {
    pub kind: FailureKind,
    pub message: String,
    /// 分片上传已初始化时的 upload_id，调用方可据此调用 abort 清理
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
}

impl UploadFailure {
    pub fn from_error(error: &UploadError, upload_id: Option<String>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            upload_id,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}
