// 上传分片管理
//
// 分片规则（多段上传协议）：
// - 文件 <= 10MB：不分片，单请求上传
// - 文件 > 10MB：固定 5MB 分片，最后一个分片可以更短
// - 分片编号从 1 开始，按升序上传

use crate::config::UploadConfig;
use crate::uploader::{FileHandle, UploadError};
use std::ops::Range;
use tracing::{debug, info};

pub const MIB: u64 = 1024 * 1024;

/// 默认分片大小: 5MB（多段上传协议允许的最小分片）
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * MIB;

/// 最小分片大小: 5MB
pub const MIN_CHUNK_SIZE: u64 = 5 * MIB;

/// 超过此大小使用分片上传
pub const STANDARD_THRESHOLD: u64 = 10 * MIB;

/// 超过此大小先调用视频优化钩子
pub const COMPRESSION_THRESHOLD: u64 = 20 * MIB;

/// 单文件大小上限: 500MB
pub const MAX_FILE_SIZE: u64 = 500 * MIB;

/// 上传策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// 单请求上传
    Standard,
    /// 多段分片上传
    Chunked,
}

/// 上传计划（上传开始时确定，中途不再重新计算）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPlan {
    pub strategy: UploadStrategy,
    pub chunk_size: u64,
    pub part_count: u32,
}

impl UploadPlan {
    /// 根据文件大小和阈值选择策略
    ///
    /// 恰好等于阈值的文件走单请求上传
    pub fn for_size(file_size: u64, standard_threshold: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
        if file_size > standard_threshold {
            Self {
                strategy: UploadStrategy::Chunked,
                chunk_size,
                part_count: part_count(file_size, chunk_size),
            }
        } else {
            Self {
                strategy: UploadStrategy::Standard,
                chunk_size: file_size,
                part_count: 1,
            }
        }
    }

    pub fn from_config(file_size: u64, config: &UploadConfig) -> Self {
        Self::for_size(
            file_size,
            config.standard_threshold_bytes(),
            config.chunk_size_bytes(),
        )
    }
}

/// 分片数量 = ceil(文件大小 / 分片大小)
pub fn part_count(file_size: u64, chunk_size: u64) -> u32 {
    file_size.div_ceil(chunk_size) as u32
}

/// 分片字节范围: [(n-1)*chunk, min(n*chunk, size))
pub fn part_range(part_number: u32, chunk_size: u64, file_size: u64) -> Range<u64> {
    let start = (part_number as u64 - 1) * chunk_size;
    let end = (start + chunk_size).min(file_size);
    start..end
}

/// 上传分片信息
#[derive(Debug, Clone)]
pub struct UploadPart {
    /// 分片编号（从 1 开始）
    pub part_number: u32,
    /// 字节范围
    pub range: Range<u64>,
    /// 服务器返回（或本地生成）的 ETag，上传成功后设置
    pub etag: Option<String>,
    /// 已尝试次数
    pub attempts: u32,
}

impl UploadPart {
    pub fn new(part_number: u32, range: Range<u64>) -> Self {
        Self {
            part_number,
            range,
            etag: None,
            attempts: 0,
        }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_completed(&self) -> bool {
        self.etag.is_some()
    }

    /// 读取分片数据
    pub async fn read_data(&self, file: &FileHandle) -> Result<Vec<u8>, UploadError> {
        let data = file.read_range(self.range.clone()).await?;
        debug!(
            "读取分片 #{}: bytes={}-{}, 大小={} bytes",
            self.part_number,
            self.range.start,
            self.range.end - 1,
            data.len()
        );
        Ok(data)
    }
}

/// 已存储分片的结果（complete 阶段的输入）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartResult {
    pub part_number: u32,
    pub etag: String,
}

/// 上传分片管理器
#[derive(Debug)]
pub struct UploadPartManager {
    parts: Vec<UploadPart>,
    total_size: u64,
}

impl UploadPartManager {
    /// 创建分片管理器
    ///
    /// # 参数
    /// * `total_size` - 文件总大小
    /// * `chunk_size` - 分片大小（会被限制为不小于 5MB）
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(MIN_CHUNK_SIZE);
        let count = part_count(total_size, chunk_size);
        let parts = (1..=count)
            .map(|n| UploadPart::new(n, part_range(n, chunk_size, total_size)))
            .collect::<Vec<_>>();

        info!(
            "创建分片管理器: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
            total_size,
            chunk_size,
            parts.len()
        );

        Self {
            parts,
            total_size,
        }
    }

    pub fn parts(&self) -> &[UploadPart] {
        &self.parts
    }

    pub fn part(&self, part_number: u32) -> Option<&UploadPart> {
        self.parts.get(part_number.checked_sub(1)? as usize)
    }

    pub fn part_count(&self) -> u32 {
        self.parts.len() as u32
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// 已完成的分片数量
    pub fn completed_count(&self) -> usize {
        self.parts.iter().filter(|p| p.is_completed()).count()
    }

    /// 已上传的字节数
    pub fn uploaded_bytes(&self) -> u64 {
        self.parts
            .iter()
            .filter(|p| p.is_completed())
            .map(|p| p.size())
            .sum()
    }

    /// 是否所有分片都已记录结果
    pub fn is_completed(&self) -> bool {
        self.parts.iter().all(|p| p.is_completed())
    }

    /// 记录一次上传尝试
    pub fn record_attempt(&mut self, part_number: u32) -> u32 {
        match part_number
            .checked_sub(1)
            .and_then(|i| self.parts.get_mut(i as usize))
        {
            Some(part) => {
                part.attempts += 1;
                part.attempts
            }
            None => 0,
        }
    }

    /// 标记分片已完成
    pub fn mark_completed(&mut self, part_number: u32, etag: String) {
        if let Some(part) = part_number
            .checked_sub(1)
            .and_then(|i| self.parts.get_mut(i as usize))
        {
            part.etag = Some(etag);
        }
    }

    /// 按分片编号排序的结果列表
    pub fn part_results(&self) -> Vec<PartResult> {
        self.parts
            .iter()
            .filter_map(|p| {
                p.etag.as_ref().map(|etag| PartResult {
                    part_number: p.part_number,
                    etag: etag.clone(),
                })
            })
            .collect()
    }
}
