// 使用进程内模拟后端验证 HttpTransport 与 UploadCoordinator 的完整流程

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Form, Json, Router};
use lecture_uploader::config::{ApiConfig, UploadConfig};
use lecture_uploader::{
    ChannelObserver, FailureKind, FileHandle, HttpTransport, StaticToken, UploadCoordinator,
    UploadError, UploadEvent, UploadTarget,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;
use tokio::net::TcpListener;

const MIB: usize = 1024 * 1024;
const TOKEN: &str = "test-token";

#[derive(Default)]
struct Session {
    parts_expected: u32,
    data: BTreeMap<u32, Vec<u8>>,
    etags: BTreeMap<u32, String>,
    completed: bool,
}

#[derive(Default)]
struct Backend {
    base_url: String,
    sessions: HashMap<String, Session>,
    /// (字段名, 大小)
    standard_fields: Vec<(String, usize)>,
    /// 收到的 Authorization 头（None 表示未携带）
    auth_on_put: Vec<Option<String>>,
    /// 存储端对某个分片返回 500 的剩余次数
    failing_part: Option<(u32, u32)>,
    put_count: usize,
    /// 单请求上传的固定响应（状态码, 响应体）
    standard_reply: Option<(StatusCode, &'static str)>,
    standard_requests: usize,
}

type Shared = Arc<Mutex<Backend>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(&format!("Bearer {}", TOKEN)[..])
}

fn unauthorized() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"detail": "Not authenticated"})),
    )
        .into_response()
}

async fn upload_video(
    State(state): State<Shared>,
    Path((course_id, lecture_id)): Path<(u64, u64)>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut fields = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let data = field.bytes().await.unwrap_or_default();
        fields.push((name, data.len()));
    }
    let mut backend = state.lock();
    backend.standard_fields = fields;
    backend.standard_requests += 1;
    if let Some((status, body)) = backend.standard_reply {
        return (status, body).into_response();
    }
    Json(json!({
        "message": "Video uploaded successfully",
        "video_url": format!("https://cdn.test/{}/{}.mp4", course_id, lecture_id),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct InitForm {
    course_id: u64,
    lecture_id: u64,
    file_size: u64,
    file_type: String,
    parts: u32,
}

async fn init_upload(
    State(state): State<Shared>,
    headers: HeaderMap,
    Form(form): Form<InitForm>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let upload_id = uuid::Uuid::new_v4().to_string();
    let mut backend = state.lock();
    let urls: HashMap<String, String> = (1..=form.parts)
        .map(|n| {
            (
                n.to_string(),
                format!("{}/storage/{}/{}", backend.base_url, upload_id, n),
            )
        })
        .collect();
    backend.sessions.insert(
        upload_id.clone(),
        Session {
            parts_expected: form.parts,
            ..Default::default()
        },
    );
    Json(json!({
        "upload_id": upload_id,
        "presigned_urls": urls,
        "key": format!("videos/{}/{}/{}", form.course_id, form.lecture_id, form.file_type),
        "expires_at": "2030-01-01T00:00:00",
        "file_size": form.file_size,
    }))
    .into_response()
}

async fn storage_put(
    State(state): State<Shared>,
    Path((upload_id, part_number)): Path<(String, u32)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut backend = state.lock();
    backend.put_count += 1;
    backend.auth_on_put.push(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    if let Some((part, remaining)) = backend.failing_part.as_mut() {
        if *part == part_number && *remaining > 0 {
            *remaining -= 1;
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match backend.sessions.get_mut(&upload_id) {
        Some(session) => {
            session.data.insert(part_number, body.to_vec());
            (
                StatusCode::OK,
                [(header::ETAG, format!("\"{}-{}\"", upload_id, part_number))],
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Deserialize)]
struct PartForm {
    upload_id: String,
    part_number: u32,
    etag: String,
}

async fn upload_part(
    State(state): State<Shared>,
    headers: HeaderMap,
    Form(form): Form<PartForm>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut backend = state.lock();
    let Some(session) = backend.sessions.get_mut(&form.upload_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    session.etags.insert(form.part_number, form.etag);
    let received = session.etags.len() as u32;
    Json(json!({
        "upload_id": form.upload_id,
        "part_number": form.part_number,
        "parts_received": received,
        "parts_expected": session.parts_expected,
        "progress": format!("{}%", received * 100 / session.parts_expected),
    }))
    .into_response()
}

#[derive(Deserialize)]
struct UploadIdForm {
    upload_id: String,
}

async fn complete_upload(
    State(state): State<Shared>,
    headers: HeaderMap,
    Form(form): Form<UploadIdForm>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut backend = state.lock();
    let Some(session) = backend.sessions.get_mut(&form.upload_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if session.etags.len() as u32 != session.parts_expected {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Not all parts uploaded"})),
        )
            .into_response();
    }
    session.completed = true;
    Json(json!({
        "message": "Upload completed",
        "video_url": format!("https://cdn.test/{}.mp4", form.upload_id),
    }))
    .into_response()
}

async fn abort_upload(
    State(state): State<Shared>,
    headers: HeaderMap,
    Form(form): Form<UploadIdForm>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    match state.lock().sessions.remove(&form.upload_id) {
        Some(_) => Json(json!({"message": "Upload aborted", "course_id": 1, "lecture_id": 2}))
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn upload_status(
    State(state): State<Shared>,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let backend = state.lock();
    let Some(session) = backend.sessions.get(&upload_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Upload not found"})),
        )
            .into_response();
    };
    let received = session.etags.len() as u32;
    let value = received * 100 / session.parts_expected.max(1);
    let status = if session.completed {
        "completed"
    } else {
        "in_progress"
    };
    Json(json!({
        "upload_id": upload_id,
        "status": status,
        "parts_received": received,
        "parts_expected": session.parts_expected,
        "progress": format!("{}%", value),
        "progress_value": value,
    }))
    .into_response()
}

async fn spawn_backend() -> Shared {
    let state: Shared = Arc::new(Mutex::new(Backend::default()));
    let app = Router::new()
        .route(
            "/api/courses/:course_id/lectures/:lecture_id/upload-video",
            post(upload_video),
        )
        .route("/api/upload/init-upload", post(init_upload))
        .route("/api/upload/upload-part", post(upload_part))
        .route("/api/upload/complete-upload", post(complete_upload))
        .route("/api/upload/abort-upload", post(abort_upload))
        .route("/api/upload/status/:upload_id", get(upload_status))
        .route("/storage/:upload_id/:part_number", put(storage_put))
        .layer(DefaultBodyLimit::max(64 * MIB))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    state.lock().base_url = format!("http://{}", addr);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    state
}

fn coordinator(state: &Shared, token: Option<&str>) -> UploadCoordinator {
    let api = ApiConfig {
        base_url: state.lock().base_url.clone(),
        ..Default::default()
    };
    let transport = match token {
        Some(t) => HttpTransport::new(&api, Arc::new(StaticToken::new(t))).unwrap(),
        None => HttpTransport::new(&api, Arc::new(|| None::<String>)).unwrap(),
    };
    UploadCoordinator::new(
        Arc::new(transport),
        UploadConfig {
            retry_delay_ms: 5,
            ..Default::default()
        },
    )
}

fn pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn progress(events: &[UploadEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Progress { percent } => Some(*percent),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_chunked_upload_from_disk() {
    let state = spawn_backend().await;
    let coordinator = coordinator(&state, Some(TOKEN));

    let content = pattern(12 * MIB);
    let mut tmp = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    tmp.write_all(&content).unwrap();
    tmp.flush().unwrap();

    let file = FileHandle::open(tmp.path()).await.unwrap();
    let (observer, mut rx) = ChannelObserver::new();
    let body = coordinator
        .upload(file, UploadTarget::new(1, 2), Arc::new(observer))
        .await
        .unwrap();
    assert_eq!(body["message"], "Upload completed");

    let events = drain(&mut rx);
    assert_eq!(progress(&events), vec![5, 43, 80, 95, 100]);
    assert!(matches!(events.last(), Some(UploadEvent::Succeeded { .. })));

    let backend = state.lock();
    assert_eq!(backend.sessions.len(), 1);
    let session = backend.sessions.values().next().unwrap();
    assert!(session.completed);
    assert_eq!(session.parts_expected, 3);
    let assembled: Vec<u8> = session.data.values().flatten().copied().collect();
    assert_eq!(assembled, content);
    assert!(session.etags.values().all(|e| !e.is_empty()));
    // 预签名 URL 不携带 Authorization 头
    assert!(backend.auth_on_put.iter().all(Option::is_none));
}

#[tokio::test]
async fn test_standard_upload_sends_multipart_fields() {
    let state = spawn_backend().await;
    let coordinator = coordinator(&state, Some(TOKEN));

    let file = FileHandle::from_bytes("intro.mp4", Some("video/mp4"), pattern(2 * MIB));
    let (observer, mut rx) = ChannelObserver::new();
    let body = coordinator
        .upload(file, UploadTarget::new(7, 9), Arc::new(observer))
        .await
        .unwrap();
    assert_eq!(body["video_url"], "https://cdn.test/7/9.mp4");

    let events = drain(&mut rx);
    let p = progress(&events);
    assert_eq!(p.first(), Some(&0));
    assert_eq!(p.last(), Some(&100));
    assert!(p.windows(2).all(|w| w[0] < w[1]));

    let backend = state.lock();
    let fields: HashMap<_, _> = backend.standard_fields.iter().cloned().collect();
    assert_eq!(fields.get("video"), Some(&(2 * MIB)));
    assert_eq!(fields.get("course_id"), Some(&1));
    assert_eq!(fields.get("lecture_id"), Some(&1));
    assert!(backend.sessions.is_empty());
}

#[tokio::test]
async fn test_storage_errors_are_retried() {
    let state = spawn_backend().await;
    state.lock().failing_part = Some((2, 2));
    let coordinator = coordinator(&state, Some(TOKEN));

    let file = FileHandle::from_bytes("lecture.mp4", Some("video/mp4"), pattern(11 * MIB));
    let (observer, mut rx) = ChannelObserver::new();
    let result = coordinator
        .upload(file, UploadTarget::new(1, 2), Arc::new(observer))
        .await;
    assert!(result.is_ok());
    assert_eq!(state.lock().put_count, 5);

    let events = drain(&mut rx);
    assert!(!events
        .iter()
        .any(|e| matches!(e, UploadEvent::Failed { .. })));
}

#[tokio::test]
async fn test_storage_exhaustion_reports_upload_id() {
    let state = spawn_backend().await;
    state.lock().failing_part = Some((1, 3));
    let coordinator = coordinator(&state, Some(TOKEN));

    let file = FileHandle::from_bytes("lecture.mp4", Some("video/mp4"), pattern(11 * MIB));
    let (observer, mut rx) = ChannelObserver::new();
    let err = coordinator
        .upload(file, UploadTarget::new(1, 2), Arc::new(observer))
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Failed to upload part 1 after 3 attempts"));

    let failure = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            UploadEvent::Failed { failure } => Some(failure),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure.kind, FailureKind::Protocol);
    let upload_id = failure.upload_id.unwrap();

    // 会话仍保留在服务端，调用方可显式中止
    let client = coordinator.status_client();
    let status = client.get_status(&upload_id).await.unwrap();
    assert_eq!(status.parts_received, 0);
    assert_eq!(status.parts_expected, 3);

    let resp = client.abort(&upload_id).await.unwrap();
    assert_eq!(resp.message, "Upload aborted");
    assert!(state.lock().sessions.is_empty());
}

#[tokio::test]
async fn test_missing_token_surfaces_protocol_error() {
    let state = spawn_backend().await;
    let coordinator = coordinator(&state, None);

    let file = FileHandle::from_bytes("lecture.mp4", Some("video/mp4"), pattern(11 * MIB));
    let (observer, _rx) = ChannelObserver::new();
    let err = coordinator
        .upload(file, UploadTarget::new(1, 2), Arc::new(observer))
        .await
        .unwrap_err();

    match err {
        UploadError::Protocol { status, .. } => assert_eq!(status, 403),
        other => panic!("unexpected error: {}", other),
    }
    assert!(state.lock().sessions.is_empty());
}

#[tokio::test]
async fn test_unknown_status_carries_status_text() {
    let state = spawn_backend().await;
    let coordinator = coordinator(&state, Some(TOKEN));

    let err = coordinator
        .status_client()
        .get_status("does-not-exist")
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Failed to get upload status: 404 Not Found"));
}

async fn failed_standard_upload(reply: (StatusCode, &'static str)) -> (Shared, UploadError, Vec<UploadEvent>) {
    let state = spawn_backend().await;
    state.lock().standard_reply = Some(reply);
    let coordinator = coordinator(&state, Some(TOKEN));

    let file = FileHandle::from_bytes("intro.mp4", Some("video/mp4"), pattern(MIB));
    let (observer, mut rx) = ChannelObserver::new();
    let err = coordinator
        .upload(file, UploadTarget::new(7, 9), Arc::new(observer))
        .await
        .unwrap_err();
    let events = drain(&mut rx);
    (state, err, events)
}

fn failures(events: &[UploadEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Failed { failure } => Some(failure.message.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_standard_rejection_is_not_retried() {
    let (state, err, events) =
        failed_standard_upload((StatusCode::INTERNAL_SERVER_ERROR, "boom")).await;

    assert_eq!(err.to_string(), "Upload failed with status 500: Internal Server Error");
    assert_eq!(err.kind(), FailureKind::Protocol);
    assert_eq!(state.lock().standard_requests, 1);

    assert_eq!(
        failures(&events),
        vec!["Upload failed with status 500: Internal Server Error".to_string()]
    );
    assert!(!events
        .iter()
        .any(|e| matches!(e, UploadEvent::Succeeded { .. })));
    assert!(progress(&events).iter().all(|p| *p < 100));
}

#[tokio::test]
async fn test_standard_non_json_body_is_invalid_response() {
    let (state, err, events) = failed_standard_upload((StatusCode::OK, "not json")).await;

    assert!(matches!(err, UploadError::InvalidResponse(_)));
    assert_eq!(err.to_string(), "Invalid response from server");
    assert_eq!(state.lock().standard_requests, 1);

    assert_eq!(failures(&events), vec!["Invalid response from server".to_string()]);
    assert!(!events
        .iter()
        .any(|e| matches!(e, UploadEvent::Succeeded { .. })));
    let p = progress(&events);
    assert_eq!(p.first(), Some(&0));
    assert_eq!(p.last(), Some(&99));
}
