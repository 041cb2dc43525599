//! # 生命周期状态机
//!
//! ## 设计思路
//!
//! 每个组件一台状态机：`Unloaded`（初始/终态）、`Loading`、`Loaded`（终态）、`Failed`（终态）。
//! 每次会话都从 `Unloaded → Loading` 重新进入，最终到达 `Loaded` / `Failed` 之一，
//! 或被取消而不产生任何终态事件。
//!
//! ## 实现思路
//!
//! - 状态只在变化时通知宿主，重复进入同一状态不重复通知。
//! - 挂载与事件通过 `ImageHost` 发出，状态机本身不持有锁，由组件在门锁内调用。

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::host::{ImageEvent, ImageHost};
use super::source::ImageHandle;
use super::ImageError;

/// 组件生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum LifecycleState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unloaded => "Unloaded",
            Self::Loading => "Loading",
            Self::Loaded => "Loaded",
            Self::Failed => "Failed",
        }
    }

    /// 允许的状态迁移。
    ///
    /// 任何状态都可以回到 `Unloaded`（新会话开始时先卸载）；
    /// 终态只能由 `Loading` 到达。
    pub fn can_transition(self, next: Self) -> bool {
        match (self, next) {
            (_, Self::Unloaded) => true,
            (Self::Unloaded, Self::Loading) => true,
            (Self::Loading, Self::Loaded | Self::Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Loaded | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态机：记录当前状态，并把挂载/状态/事件转发给宿主。
pub(crate) struct StateMachine {
    state: LifecycleState,
    host: Arc<dyn ImageHost>,
}

impl StateMachine {
    pub(crate) fn new(host: Arc<dyn ImageHost>) -> Self {
        Self {
            state: LifecycleState::Unloaded,
            host,
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state
    }

    /// 清空显示并回到 `Unloaded`。
    pub(crate) fn detach(&mut self) {
        self.host.attach(None);
        self.transition(LifecycleState::Unloaded);
    }

    pub(crate) fn begin_loading(&mut self) {
        self.transition(LifecycleState::Loading);
    }

    /// 挂载图片。宽高均为正时进入 `Loaded` 并发出 `Opened`，否则回到 `Unloaded`。
    ///
    /// 返回最终状态。
    pub(crate) fn attach(&mut self, session_id: u64, image: ImageHandle) -> LifecycleState {
        let (width, height) = (image.width(), image.height());
        let positive = image.has_positive_size();
        self.host.attach(Some(image));

        if positive {
            self.transition(LifecycleState::Loaded);
            self.host.emit(ImageEvent::Opened {
                session_id,
                width,
                height,
            });
        } else {
            log::info!("ℹ️ 会话 {} 的图片尺寸为 {}x{}，保持 Unloaded", session_id, width, height);
            self.transition(LifecycleState::Unloaded);
        }

        self.state
    }

    pub(crate) fn fail(&mut self, session_id: u64, error: &ImageError) {
        self.transition(LifecycleState::Failed);
        self.host.emit(ImageEvent::Failed {
            session_id,
            code: error.code().to_string(),
            stage: error.stage().to_string(),
            message: error.to_string(),
        });
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state == next {
            return;
        }

        if !self.state.can_transition(next) {
            log::warn!("⚠️ 非预期的状态迁移：{} → {}", self.state, next);
        }

        log::debug!("🔄 状态迁移：{} → {}", self.state, next);
        self.state = next;
        self.host.notify_state(next);
    }
}
