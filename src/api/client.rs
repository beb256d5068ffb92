// 上传接口客户端实现

use crate::api::{
    AbortUploadResponse, InitUploadRequest, InitUploadResponse, PartStatusResponse,
    UploadStatusResponse,
};
use crate::auth::TokenProvider;
use crate::config::ApiConfig;
use crate::uploader::{FileHandle, PartResult, UploadError, UploadTarget};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ETAG;
use reqwest::{multipart, Body, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// 单请求上传读取文件的块大小
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// 已发送字节数回调
pub type BytesSentFn = Arc<dyn Fn(u64) + Send + Sync>;

/// 上传协议传输层
///
/// 上传策略只依赖此 trait，便于替换实现（测试中使用脚本化实现）
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// 单请求上传整个文件
    async fn upload_standard(
        &self,
        target: &UploadTarget,
        file: &FileHandle,
        on_sent: BytesSentFn,
    ) -> Result<Value, UploadError>;

    /// 初始化分片上传会话
    async fn init_upload(&self, req: &InitUploadRequest)
        -> Result<InitUploadResponse, UploadError>;

    /// 向预签名 URL 上传分片，返回 ETag（如果存储端提供）
    async fn put_part(&self, url: &str, data: Vec<u8>) -> Result<Option<String>, UploadError>;

    /// 上报分片完成
    async fn report_part(
        &self,
        upload_id: &str,
        part: &PartResult,
    ) -> Result<PartStatusResponse, UploadError>;

    /// 完成分片上传
    async fn complete_upload(&self, upload_id: &str) -> Result<Value, UploadError>;

    /// 中止分片上传，释放服务端保留的存储
    async fn abort_upload(&self, upload_id: &str) -> Result<AbortUploadResponse, UploadError>;

    /// 查询上传会话状态
    async fn upload_status(&self, upload_id: &str) -> Result<UploadStatusResponse, UploadError>;
}

/// 基于 reqwest 的 HTTP 传输层
#[derive(Clone)]
pub struct HttpTransport {
    /// HTTP客户端
    client: Client,
    /// 后端基础地址（不含末尾斜杠）
    base_url: String,
    /// Bearer 令牌提供者
    tokens: Arc<dyn TokenProvider>,
}

impl HttpTransport {
    /// 创建 HTTP 传输层
    ///
    /// # 参数
    /// * `config` - 接口配置（基础地址、请求超时）
    /// * `tokens` - Bearer 令牌提供者
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, UploadError> {
        let mut builder = Client::builder();
        // 未配置时不设置超时，依赖传输层自身的错误上报
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| UploadError::transport("creating HTTP client", &e))?;

        info!(
            "初始化上传客户端: base_url={}, timeout={:?}",
            config.base_url, config.request_timeout_secs
        );

        Ok(Self::with_client(client, &config.base_url, tokens))
    }

    /// 使用已有的 reqwest 客户端
    pub fn with_client(client: Client, base_url: &str, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.tokens.token() {
            Some(token) => builder.bearer_auth(token),
            None => {
                warn!("未配置访问令牌，请求将不携带 Authorization 头");
                builder
            }
        }
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> Result<Response, UploadError> {
        builder
            .send()
            .await
            .map_err(|e| UploadError::transport(context, &e))
    }
}

/// 检查状态码并读取响应体
async fn read_body(response: Response, context: &str) -> Result<String, UploadError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| UploadError::transport(context, &e))?;

    debug!("{} 响应: status={}, body={}", context, status, body);

    if !status.is_success() {
        return Err(UploadError::Protocol {
            context: context.to_string(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            body,
        });
    }
    Ok(body)
}

async fn read_json<T: DeserializeOwned>(response: Response, context: &str) -> Result<T, UploadError> {
    let body = read_body(response, context).await?;
    serde_json::from_str(&body).map_err(UploadError::InvalidResponse)
}

/// 从 PUT 响应中取出 ETag（空值视为缺失）
fn extract_etag(response: &Response) -> Option<String> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn upload_standard(
        &self,
        target: &UploadTarget,
        file: &FileHandle,
        on_sent: BytesSentFn,
    ) -> Result<Value, UploadError> {
        let url = self.url(&format!(
            "/api/courses/{}/lectures/{}/upload-video",
            target.course_id, target.lecture_id
        ));

        info!(
            "单请求上传: course={}, lecture={}, file={}, size={}",
            target.course_id,
            target.lecture_id,
            file.name(),
            file.size()
        );

        // 流式请求体：每读出一块就上报一次已发送字节数
        let reader = file.reader().await?;
        let mut sent = 0u64;
        let stream = ReaderStream::with_capacity(reader, STREAM_CHUNK_SIZE).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                on_sent(sent);
            }
            chunk
        });

        let part = multipart::Part::stream_with_length(Body::wrap_stream(stream), file.size())
            .file_name(file.name().to_string())
            .mime_str(file.mime_type())
            .map_err(|_| {
                UploadError::Validation(format!("Invalid MIME type: {}", file.mime_type()))
            })?;

        let form = multipart::Form::new()
            .text("course_id", target.course_id.to_string())
            .text("lecture_id", target.lecture_id.to_string())
            .part("video", part);

        let builder = self.authorized(self.client.post(&url)).multipart(form);
        let response = self.send(builder, "Upload failed").await?;
        let body = read_body(response, "Upload failed")
            .await
            .map_err(|e| match e {
                UploadError::Protocol {
                    status,
                    status_text,
                    body,
                    ..
                } => UploadError::UploadRejected {
                    status,
                    status_text,
                    body,
                },
                other => other,
            })?;
        serde_json::from_str(&body).map_err(UploadError::InvalidResponse)
    }

    async fn init_upload(
        &self,
        req: &InitUploadRequest,
    ) -> Result<InitUploadResponse, UploadError> {
        info!(
            "初始化分片上传: course={}, lecture={}, size={}, parts={}",
            req.course_id, req.lecture_id, req.file_size, req.parts
        );

        let builder = self
            .authorized(self.client.post(self.url("/api/upload/init-upload")))
            .form(req);
        let response = self.send(builder, "Failed to initialize upload").await?;
        let init: InitUploadResponse = read_json(response, "Failed to initialize upload").await?;

        info!(
            "分片上传初始化成功: upload_id={}, presigned_urls={}",
            init.upload_id,
            init.presigned_urls.len()
        );
        Ok(init)
    }

    async fn put_part(&self, url: &str, data: Vec<u8>) -> Result<Option<String>, UploadError> {
        let size = data.len();
        // 预签名 URL 自带授权，不附加 Authorization 头
        let response = self
            .send(self.client.put(url).body(data), "Part upload")
            .await?;
        let etag = extract_etag(&response);
        read_body(response, "Part upload rejected").await?;

        debug!("分片 PUT 成功: size={}, etag={:?}", size, etag);
        Ok(etag)
    }

    async fn report_part(
        &self,
        upload_id: &str,
        part: &PartResult,
    ) -> Result<PartStatusResponse, UploadError> {
        let part_number = part.part_number.to_string();
        let builder = self
            .authorized(self.client.post(self.url("/api/upload/upload-part")))
            .form(&[
                ("upload_id", upload_id),
                ("part_number", part_number.as_str()),
                ("etag", part.etag.as_str()),
            ]);
        let context = format!("Failed to record part {}", part.part_number);
        let response = self.send(builder, &context).await?;
        let body = read_body(response, &context).await?;

        // 2xx 即视为记账成功，响应体只用于日志
        let status = serde_json::from_str::<PartStatusResponse>(&body).unwrap_or_default();
        debug!(
            "分片状态已上报: part={}, received={}/{}",
            part.part_number, status.parts_received, status.parts_expected
        );
        Ok(status)
    }

    async fn complete_upload(&self, upload_id: &str) -> Result<Value, UploadError> {
        info!("完成分片上传: upload_id={}", upload_id);

        let builder = self
            .authorized(self.client.post(self.url("/api/upload/complete-upload")))
            .form(&[("upload_id", upload_id)]);
        let response = self.send(builder, "Failed to complete upload").await?;
        read_json(response, "Failed to complete upload").await
    }

    async fn abort_upload(&self, upload_id: &str) -> Result<AbortUploadResponse, UploadError> {
        info!("中止分片上传: upload_id={}", upload_id);

        let builder = self
            .authorized(self.client.post(self.url("/api/upload/abort-upload")))
            .form(&[("upload_id", upload_id)]);
        let response = self.send(builder, "Failed to abort upload").await?;
        read_json(response, "Failed to abort upload").await
    }

    async fn upload_status(&self, upload_id: &str) -> Result<UploadStatusResponse, UploadError> {
        let url = self.url(&format!(
            "/api/upload/status/{}",
            urlencoding::encode(upload_id)
        ));
        let builder = self.authorized(self.client.get(&url));
        let response = self.send(builder, "Failed to get upload status").await?;
        read_json(response, "Failed to get upload status").await
    }
}
