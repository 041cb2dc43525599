//! # 加载会话
//!
//! 一个会话对应一次来源解析。组件同一时刻最多只有一个活动会话；
//! 新赋值会先取消旧会话并等待其确认退出，再创建新会话。
//!
//! 取消是协作式的：`CancellationToken` 在挂起点（外部加载）与挂载前都会被检查。

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::state::LifecycleState;

/// 会话结束方式。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// 图片已挂载且宽高为正。
    Loaded,
    /// 空来源，或图片宽高为 0。
    Unloaded,
    /// 失败，携带错误码。
    Failed { code: &'static str },
    /// 被新会话取代，不产生终态事件。
    Cancelled,
}

impl SessionOutcome {
    /// 对应的组件状态；取消没有对应状态。
    pub fn state(&self) -> Option<LifecycleState> {
        match self {
            Self::Loaded => Some(LifecycleState::Loaded),
            Self::Unloaded => Some(LifecycleState::Unloaded),
            Self::Failed { .. } => Some(LifecycleState::Failed),
            Self::Cancelled => None,
        }
    }
}

/// 调用方持有的会话句柄。
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<SessionOutcome>>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: u64,
        cancel: CancellationToken,
        outcome: watch::Receiver<Option<SessionOutcome>>,
    ) -> Self {
        Self { id, cancel, outcome }
    }

    /// 已在创建时完成的会话（空来源）。
    pub(crate) fn completed(id: u64, outcome: SessionOutcome) -> Self {
        let (_tx, rx) = watch::channel(Some(outcome));
        Self::new(id, CancellationToken::new(), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 当前已知结果；会话未结束时为 `None`。
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome.borrow().clone()
    }

    /// 等待会话结束。
    ///
    /// 会话任务被中止而未写入结果时视为取消。
    pub async fn wait(mut self) -> SessionOutcome {
        let observed = self
            .outcome
            .wait_for(Option::is_some)
            .await
            .map(|outcome| (*outcome).clone());

        match observed {
            Ok(Some(outcome)) => outcome,
            _ => self
                .outcome
                .borrow()
                .clone()
                .unwrap_or(SessionOutcome::Cancelled),
        }
    }
}

/// 组件内部记录的活动会话。
pub(crate) struct ActiveSession {
    pub(crate) id: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) task: JoinHandle<SessionOutcome>,
}

impl ActiveSession {
    /// 发出取消信号并等待任务确认退出。
    pub(crate) async fn cancel_and_wait(self) -> SessionOutcome {
        self.cancel.cancel();
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("⚠️ 会话 {} 任务异常退出：{}", self.id, e);
                SessionOutcome::Cancelled
            }
        }
    }
}
