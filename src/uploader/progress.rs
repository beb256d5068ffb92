//! 上传进度与回调
//!
//! 回调约定：
//! - `on_progress` 在结束前可触发零次或多次，百分比单调不减
//! - `on_error` 与 `on_success` 每次上传恰好触发其中一个

use crate::uploader::{UploadFailure, UploadState};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// 初始化阶段占用的进度
pub const INIT_PROGRESS: u8 = 5;

/// 分片阶段占用的进度区间
pub const PARTS_PROGRESS_SPAN: u64 = 90;

/// 上传观察者
pub trait UploadObserver: Send + Sync {
    fn on_progress(&self, percent: u8);
    fn on_error(&self, failure: &UploadFailure);
    fn on_success(&self, result: &Value);

    /// 分片上传状态变化
    fn on_state(&self, _state: UploadState) {}
}

/// 单请求上传进度: round(已发送 / 总数 * 100)
pub fn standard_progress(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((sent.min(total) as f64 / total as f64) * 100.0).round() as u8
}

/// 分片上传进度: 5 + round(已上传 / 总数 * 90)
///
/// 按字节加权，较短的最后一个分片贡献更少
pub fn chunked_progress(uploaded: u64, total: u64) -> u8 {
    if total == 0 {
        return INIT_PROGRESS;
    }
    let span = (uploaded.min(total) as f64 / total as f64) * PARTS_PROGRESS_SPAN as f64;
    INIT_PROGRESS + span.round() as u8
}

/// 进度上报器
///
/// 保证同一次上传内进度单调不减；重复值不再上报
pub struct ProgressReporter {
    observer: Arc<dyn UploadObserver>,
    last: Mutex<Option<u8>>,
}

impl ProgressReporter {
    pub fn new(observer: Arc<dyn UploadObserver>) -> Self {
        Self {
            observer,
            last: Mutex::new(None),
        }
    }

    /// 上报进度，低于或等于上次的值会被丢弃
    pub fn report(&self, percent: u8) {
        let percent = percent.min(100);
        // 持锁回调，保证回调顺序与数值顺序一致
        let mut last = self.last.lock();
        if matches!(*last, Some(prev) if percent <= prev) {
            return;
        }
        *last = Some(percent);
        self.observer.on_progress(percent);
    }

    pub fn state(&self, state: UploadState) {
        self.observer.on_state(state);
    }
}

type ProgressFn = Box<dyn Fn(u8) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&UploadFailure) + Send + Sync>;
type SuccessFn = Box<dyn Fn(&Value) + Send + Sync>;

/// 由三个闭包组成的观察者
pub struct CallbackObserver {
    on_progress: ProgressFn,
    on_error: ErrorFn,
    on_success: SuccessFn,
}

impl CallbackObserver {
    pub fn new(
        on_progress: impl Fn(u8) + Send + Sync + 'static,
        on_error: impl Fn(&UploadFailure) + Send + Sync + 'static,
        on_success: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_progress: Box::new(on_progress),
            on_error: Box::new(on_error),
            on_success: Box::new(on_success),
        }
    }
}

impl UploadObserver for CallbackObserver {
    fn on_progress(&self, percent: u8) {
        (self.on_progress)(percent)
    }

    fn on_error(&self, failure: &UploadFailure) {
        (self.on_error)(failure)
    }

    fn on_success(&self, result: &Value) {
        (self.on_success)(result)
    }
}

/// 上传事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UploadEvent {
    Progress { percent: u8 },
    State { state: UploadState },
    Failed { failure: UploadFailure },
    Succeeded { result: Value },
}

impl UploadEvent {
    /// 是否为结束事件
    pub fn is_final(&self) -> bool {
        matches!(self, UploadEvent::Failed { .. } | UploadEvent::Succeeded { .. })
    }
}

/// 将回调转为事件流的观察者
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<UploadEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: UploadEvent) {
        // 接收端已关闭时丢弃事件
        let _ = self.tx.send(event);
    }
}

impl UploadObserver for ChannelObserver {
    fn on_progress(&self, percent: u8) {
        self.send(UploadEvent::Progress { percent });
    }

    fn on_error(&self, failure: &UploadFailure) {
        self.send(UploadEvent::Failed {
            failure: failure.clone(),
        });
    }

    fn on_success(&self, result: &Value) {
        self.send(UploadEvent::Succeeded {
            result: result.clone(),
        });
    }

    fn on_state(&self, state: UploadState) {
        self.send(UploadEvent::State { state });
    }
}
