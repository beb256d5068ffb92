// 上传任务定义
//
// 分片上传状态机：
// Idle -> Initializing -> UploadingParts -> Completing -> Done
// Failed 可从 Initializing / UploadingParts / Completing 进入
// Cancelled 可从任意非终止状态进入

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 上传目标（原样转发给后端，不做校验）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub course_id: u64,
    pub lecture_id: u64,
}

impl UploadTarget {
    pub fn new(course_id: u64, lecture_id: u64) -> Self {
        Self {
            course_id,
            lecture_id,
        }
    }
}

/// 分片上传状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Idle,
    Initializing,
    UploadingParts,
    Completing,
    Done,
    Failed,
    Cancelled,
}

impl UploadState {
    /// 是否为终止状态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Done | UploadState::Failed | UploadState::Cancelled
        )
    }

    /// 状态迁移是否合法
    pub fn can_transition_to(&self, next: UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (Idle, Initializing)
            | (Initializing, UploadingParts)
            | (UploadingParts, Completing)
            | (Completing, Done) => true,
            (Initializing | UploadingParts | Completing, Failed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// 分片上传会话（init 阶段由服务端创建）
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// 服务端分配的 upload_id
    pub upload_id: String,
    /// 分片编号 -> 预签名 URL
    pub presigned_urls: HashMap<u32, String>,
}

impl UploadSession {
    pub fn presigned_url(&self, part_number: u32) -> Option<&str> {
        self.presigned_urls.get(&part_number).map(String::as_str)
    }
}
