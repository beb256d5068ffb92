// 上传接口数据结构

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// 初始化分片上传请求
#[derive(Debug, Clone, Serialize)]
pub struct InitUploadRequest {
    pub course_id: u64,
    pub lecture_id: u64,
    pub file_size: u64,
    pub file_type: String,
    pub parts: u32,
}

/// 初始化分片上传响应
#[derive(Debug, Clone, Deserialize)]
pub struct InitUploadResponse {
    pub upload_id: String,
    /// 分片编号 -> 预签名 URL（服务端以字符串作为键）
    #[serde(deserialize_with = "deserialize_part_urls")]
    pub presigned_urls: HashMap<u32, String>,
    /// 对象存储中的目标键
    #[serde(default)]
    pub key: Option<String>,
    /// 会话过期时间（ISO 8601）
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// 分片状态上报响应
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartStatusResponse {
    #[serde(default)]
    pub upload_id: String,
    #[serde(default)]
    pub part_number: u32,
    #[serde(default)]
    pub parts_received: u32,
    #[serde(default)]
    pub parts_expected: u32,
    /// 如 "66%"
    #[serde(default)]
    pub progress: String,
}

/// 完成上传响应
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteUploadResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub course_id: Option<u64>,
    #[serde(default)]
    pub lecture_id: Option<u64>,
    #[serde(default)]
    pub key: Option<String>,
}

/// 上传会话状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub upload_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub course_id: Option<u64>,
    #[serde(default)]
    pub lecture_id: Option<u64>,
    #[serde(default)]
    pub parts_received: u32,
    #[serde(default)]
    pub parts_expected: u32,
    #[serde(default)]
    pub progress: String,
    #[serde(default)]
    pub progress_value: u8,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// 中止上传响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortUploadResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub course_id: Option<u64>,
    #[serde(default)]
    pub lecture_id: Option<u64>,
}

fn deserialize_part_urls<'de, D>(deserializer: D) -> Result<HashMap<u32, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, String>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(k, v)| {
            k.trim()
                .parse::<u32>()
                .map(|n| (n, v))
                .map_err(|_| serde::de::Error::custom(format!("invalid part number: {}", k)))
        })
        .collect()
}
