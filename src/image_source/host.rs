//! # 宿主接口
//!
//! 组件通过 `ImageHost` 与显示层交互：挂载图片、通知状态、发出事件。
//! 所有回调都在组件门锁内同步调用，实现方不应阻塞，也不能重入组件：
//! 在回调里调用 `ImageComponent` 的任何方法（包括 `state()`、`source()`）都会在门锁上死锁。
//! 需要回读组件状态时，把回调转发到通道，在回调之外处理（参见 `ChannelHost`）。
//!
//! `ChannelHost` 把回调转成 `HostCall` 发送到无界通道，供 CLI 输出与测试断言使用。

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::source::ImageHandle;
use super::state::LifecycleState;

/// 终态事件。每个会话最多发出一次。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImageEvent {
    /// 图片已挂载且宽高为正。
    Opened {
        session_id: u64,
        width: u32,
        height: u32,
    },
    /// 会话失败，携带错误码、阶段与可读信息。
    Failed {
        session_id: u64,
        code: String,
        stage: String,
        message: String,
    },
}

/// 显示目标 + 状态通知 + 事件发射。
/// 显示层回调。回调在组件门锁内执行，不得重入 `ImageComponent`。
pub trait ImageHost: Send + Sync {
    /// 挂载（`Some`）或清空（`None`）显示的图片。
    fn attach(&self, image: Option<ImageHandle>);

    /// 生命周期状态变化。
    fn notify_state(&self, state: LifecycleState);

    fn emit(&self, event: ImageEvent);
}

/// 一次宿主回调。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum HostCall {
    Attach { image: Option<ImageHandle> },
    State { state: LifecycleState },
    Event(ImageEvent),
}

/// 把宿主回调转发到通道。接收端关闭后回调被静默丢弃。
#[derive(Debug, Clone)]
pub struct ChannelHost {
    tx: UnboundedSender<HostCall>,
}

impl ChannelHost {
    pub fn new() -> (Self, UnboundedReceiver<HostCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, call: HostCall) {
        if self.tx.send(call).is_err() {
            log::debug!("宿主通道已关闭，丢弃回调");
        }
    }
}

impl ImageHost for ChannelHost {
    fn attach(&self, image: Option<ImageHandle>) {
        self.send(HostCall::Attach { image });
    }

    fn notify_state(&self, state: LifecycleState) {
        self.send(HostCall::State { state });
    }

    fn emit(&self, event: ImageEvent) {
        self.send(HostCall::Event(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_source::{ImageData, MediaKind};
    use std::sync::Arc;

    #[test]
    fn host_calls_serialize_with_tags() {
        let event = HostCall::Event(ImageEvent::Opened {
            session_id: 1,
            width: 2,
            height: 3,
        });
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({ "call": "event", "event": "opened", "session_id": 1, "width": 2, "height": 3 })
        );

        let state = serde_json::to_value(HostCall::State { state: LifecycleState::Loading }).expect("serialize");
        assert_eq!(state, serde_json::json!({ "call": "state", "state": "Loading" }));

        let image = Arc::new(ImageData::new(5, 6, MediaKind::Vector, "image/svg+xml", bytes::Bytes::new()));
        let attach = serde_json::to_value(HostCall::Attach { image: Some(image) }).expect("serialize");
        assert_eq!(
            attach,
            serde_json::json!({
                "call": "attach",
                "image": { "width": 5, "height": 6, "kind": "vector", "mime_type": "image/svg+xml" }
            })
        );
    }

    #[test]
    fn closed_receiver_does_not_panic() {
        let (host, rx) = ChannelHost::new();
        drop(rx);
        host.notify_state(LifecycleState::Loaded);
        host.attach(None);
    }
}
