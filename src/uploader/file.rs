// 待上传文件句柄
//
// 上传期间文件内容视为不可变：大小、MIME 类型、文件名在打开时确定

use crate::uploader::UploadError;
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// 无法识别文件类型时使用的 MIME
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// 类型识别读取的文件头长度
const SNIFF_LEN: usize = 8192;

/// 异步读取器（reqwest 流式请求体要求 Send + Sync）
pub type FileReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

#[derive(Clone)]
enum FileSource {
    /// 本地磁盘文件
    Path(PathBuf),
    /// 内存缓冲
    Memory(Arc<[u8]>),
}

/// 文件句柄
#[derive(Clone)]
pub struct FileHandle {
    name: String,
    mime_type: String,
    size: u64,
    source: FileSource,
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            FileSource::Path(p) => format!("{:?}", p),
            FileSource::Memory(_) => "<memory>".to_string(),
        };
        f.debug_struct("FileHandle")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .field("source", &source)
            .finish()
    }
}

impl FileHandle {
    /// 打开本地文件
    ///
    /// MIME 类型根据文件头魔数识别
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(UploadError::Validation(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }

        let mut file = File::open(path).await?;
        let mut head = vec![0u8; SNIFF_LEN.min(metadata.len() as usize)];
        file.read_exact(&mut head).await?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let mime_type = sniff_mime(&head);

        debug!(
            "打开上传文件: path={:?}, size={}, mime={}",
            path,
            metadata.len(),
            mime_type
        );

        Ok(Self {
            name,
            mime_type,
            size: metadata.len(),
            source: FileSource::Path(path.to_path_buf()),
        })
    }

    /// 从内存数据创建
    ///
    /// `mime_type` 为 None 时根据内容识别
    pub fn from_bytes(name: impl Into<String>, mime_type: Option<&str>, data: Vec<u8>) -> Self {
        let mime_type = match mime_type {
            Some(m) => m.to_string(),
            None => sniff_mime(&data[..SNIFF_LEN.min(data.len())]),
        };
        Self {
            name: name.into(),
            mime_type,
            size: data.len() as u64,
            source: FileSource::Memory(Arc::from(data)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// 文件总字节数
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 读取指定字节范围
    pub async fn read_range(&self, range: Range<u64>) -> Result<Vec<u8>, UploadError> {
        if range.end > self.size || range.start > range.end {
            return Err(UploadError::Validation(format!(
                "Byte range {}..{} out of bounds for file of {} bytes",
                range.start, range.end, self.size
            )));
        }

        match &self.source {
            FileSource::Memory(data) => {
                Ok(data[range.start as usize..range.end as usize].to_vec())
            }
            FileSource::Path(path) => {
                let mut file = File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(range.start)).await?;

                let mut buffer = vec![0u8; (range.end - range.start) as usize];
                file.read_exact(&mut buffer).await?;
                Ok(buffer)
            }
        }
    }

    /// 打开顺序读取器（单请求上传的流式请求体）
    pub async fn reader(&self) -> Result<FileReader, UploadError> {
        match &self.source {
            FileSource::Memory(data) => Ok(Box::new(std::io::Cursor::new(Arc::clone(data)))),
            FileSource::Path(path) => Ok(Box::new(File::open(path).await?)),
        }
    }
}

fn sniff_mime(head: &[u8]) -> String {
    infer::get(head)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}
