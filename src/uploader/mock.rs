// 脚本化传输层（仅测试使用）

use crate::api::{
    AbortUploadResponse, BytesSentFn, InitUploadRequest, InitUploadResponse, PartStatusResponse,
    UploadStatusResponse, UploadTransport,
};
use crate::uploader::chunk::MIB;
use crate::uploader::{FileHandle, PartResult, UploadError, UploadTarget};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub const UPLOAD_ID: &str = "u1";

/// 传输层收到的调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Standard { size: u64 },
    Init { parts: u32, file_size: u64 },
    Put { part_number: u32, size: usize },
    Report { part_number: u32, etag: String },
    Complete { upload_id: String },
    Abort { upload_id: String },
    Status { upload_id: String },
}

fn protocol(context: &str, status: u16) -> UploadError {
    UploadError::Protocol {
        context: context.to_string(),
        status,
        status_text: "Internal Server Error".to_string(),
        body: String::new(),
    }
}

fn part_url(part_number: u32) -> String {
    format!("https://storage.test/{}/part/{}", UPLOAD_ID, part_number)
}

fn part_from_url(url: &str) -> u32 {
    url.rsplit('/')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[derive(Default)]
pub struct ScriptedTransport {
    calls: Mutex<Vec<Call>>,
    /// 分片编号 -> 剩余的失败次数
    put_failures: Mutex<HashMap<u32, u32>>,
    omit_etag: bool,
    missing_url: Option<u32>,
    init_status: Option<u16>,
    report_status: Option<u16>,
    complete_status: Option<u16>,
    /// 上报此分片后触发取消
    cancel_after_report: Option<(u32, CancellationToken)>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_put(self, part_number: u32, times: u32) -> Self {
        self.put_failures.lock().insert(part_number, times);
        self
    }

    pub fn without_etag(mut self) -> Self {
        self.omit_etag = true;
        self
    }

    pub fn without_url_for(mut self, part_number: u32) -> Self {
        self.missing_url = Some(part_number);
        self
    }

    pub fn init_status(mut self, status: u16) -> Self {
        self.init_status = Some(status);
        self
    }

    pub fn report_status(mut self, status: u16) -> Self {
        self.report_status = Some(status);
        self
    }

    pub fn complete_status(mut self, status: u16) -> Self {
        self.complete_status = Some(status);
        self
    }

    pub fn cancel_after_report(mut self, part_number: u32, token: CancellationToken) -> Self {
        self.cancel_after_report = Some((part_number, token));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn put_calls(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Put { part_number, .. } => Some(part_number),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn upload_standard(
        &self,
        _target: &UploadTarget,
        file: &FileHandle,
        on_sent: BytesSentFn,
    ) -> Result<Value, UploadError> {
        self.record(Call::Standard { size: file.size() });
        let mut sent = 0;
        while sent < file.size() {
            sent = (sent + MIB / 2).min(file.size());
            on_sent(sent);
        }
        Ok(json!({"message": "Video uploaded successfully", "video_url": "https://cdn.test/v.mp4"}))
    }

    async fn init_upload(
        &self,
        req: &InitUploadRequest,
    ) -> Result<InitUploadResponse, UploadError> {
        self.record(Call::Init {
            parts: req.parts,
            file_size: req.file_size,
        });
        if let Some(status) = self.init_status {
            return Err(protocol("Failed to initialize upload", status));
        }
        let presigned_urls = (1..=req.parts)
            .filter(|n| Some(*n) != self.missing_url)
            .map(|n| (n, part_url(n)))
            .collect();
        Ok(InitUploadResponse {
            upload_id: UPLOAD_ID.to_string(),
            presigned_urls,
            key: None,
            expires_at: None,
        })
    }

    async fn put_part(&self, url: &str, data: Vec<u8>) -> Result<Option<String>, UploadError> {
        let part_number = part_from_url(url);
        self.record(Call::Put {
            part_number,
            size: data.len(),
        });

        let mut failures = self.put_failures.lock();
        if let Some(remaining) = failures.get_mut(&part_number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(UploadError::Transport {
                    context: "Part upload".to_string(),
                    message: "connection reset".to_string(),
                    timeout: false,
                });
            }
        }

        if self.omit_etag {
            Ok(None)
        } else {
            Ok(Some(format!("\"etag-{}\"", part_number)))
        }
    }

    async fn report_part(
        &self,
        upload_id: &str,
        part: &PartResult,
    ) -> Result<PartStatusResponse, UploadError> {
        self.record(Call::Report {
            part_number: part.part_number,
            etag: part.etag.clone(),
        });
        if let Some(status) = self.report_status {
            return Err(protocol(
                &format!("Failed to record part {}", part.part_number),
                status,
            ));
        }
        if let Some((n, token)) = &self.cancel_after_report {
            if *n == part.part_number {
                token.cancel();
            }
        }
        Ok(PartStatusResponse {
            upload_id: upload_id.to_string(),
            part_number: part.part_number,
            ..Default::default()
        })
    }

    async fn complete_upload(&self, upload_id: &str) -> Result<Value, UploadError> {
        self.record(Call::Complete {
            upload_id: upload_id.to_string(),
        });
        if let Some(status) = self.complete_status {
            return Err(protocol("Failed to complete upload", status));
        }
        Ok(json!({"message": "Upload completed", "video_url": "https://cdn.test/v.mp4"}))
    }

    async fn abort_upload(&self, upload_id: &str) -> Result<AbortUploadResponse, UploadError> {
        self.record(Call::Abort {
            upload_id: upload_id.to_string(),
        });
        Ok(AbortUploadResponse {
            message: "Upload aborted".to_string(),
            course_id: Some(1),
            lecture_id: Some(2),
        })
    }

    async fn upload_status(&self, upload_id: &str) -> Result<UploadStatusResponse, UploadError> {
        self.record(Call::Status {
            upload_id: upload_id.to_string(),
        });
        if upload_id != UPLOAD_ID {
            return Err(protocol("Failed to get upload status", 404));
        }
        Ok(UploadStatusResponse {
            upload_id: upload_id.to_string(),
            status: "in_progress".to_string(),
            course_id: Some(1),
            lecture_id: Some(2),
            parts_received: 1,
            parts_expected: 3,
            progress: "33%".to_string(),
            progress_value: 33,
            created_at: None,
            expires_at: None,
        })
    }
}
