//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `ImageComponent` 负责"来源赋值 → 会话 → 挂载/失败"的编排，不直接依赖具体显示层。
//! 处理链路固定为：
//! 1. 赋值去重（相同来源忽略），懒加载且不可见时暂存
//! 2. 取消旧会话并等待确认，清空显示，进入 `Loading`
//! 3. 规范化来源：句柄 / 内嵌数据在本地完成，引用交给外部加载器
//! 4. 在门锁内复查取消标记与代数，然后挂载或上报失败
//!
//! ## 实现思路
//!
//! - 门锁（`std::sync::Mutex<Gate>`）保护状态机、当前来源、暂存来源与代数；宿主回调都在门锁内发出，
//!   回调中不得再调用本组件的方法，否则会在门锁上死锁。
//! - 活动会话槽（`tokio::sync::Mutex`）串行化 `begin`，保证同一时刻只有一个会话。
//! - 取消信号在门锁内发出，挂载前也在门锁内检查，因此被取代的会话不可能再挂载。
//! - 大段文本的解码转移到 `spawn_blocking`，避免阻塞异步线程。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use reqwest::Url;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::config::ImageConfig;
use super::host::ImageHost;
use super::loader::{ExternalLoader, PlatformLoader};
use super::normalizer::SourceNormalizer;
use super::session::{ActiveSession, SessionHandle, SessionOutcome};
use super::source::{ImageData, ImageHandle, ResolvedSource, SourceValue, redact_url_for_log};
use super::state::{LifecycleState, StateMachine};
use super::ImageError;

/// 一次来源赋值的结果。
#[derive(Debug)]
pub enum Assignment {
    /// 已创建会话。
    Started(SessionHandle),
    /// 懒加载且组件不可见，来源已暂存。
    Deferred,
    /// 与当前来源相同，忽略。
    Unchanged,
    /// 在会话创建前已被更新的赋值取代。
    Superseded,
}

impl Assignment {
    pub fn session(self) -> Option<SessionHandle> {
        match self {
            Self::Started(handle) => Some(handle),
            _ => None,
        }
    }
}

/// 图片组件。
///
/// # 示例
/// ```rust,no_run
/// use std::sync::Arc;
/// use image_source_resolver::image_source::{ChannelHost, ImageComponent, ImageConfig, SourceValue};
///
/// # async fn demo() -> Result<(), image_source_resolver::image_source::ImageError> {
/// let (host, _calls) = ChannelHost::new();
/// let component = ImageComponent::with_platform_loader(ImageConfig::default(), Arc::new(host))?;
/// if let Some(session) = component
///     .set_source(Some(SourceValue::from("https://example.com/logo.png")))
///     .await
///     .session()
/// {
///     let outcome = session.wait().await;
///     println!("{:?} -> {}", outcome, component.state());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ImageComponent {
    inner: Arc<Inner>,
}

struct Inner {
    config: ImageConfig,
    normalizer: SourceNormalizer,
    loader: Arc<dyn ExternalLoader>,
    gate: Mutex<Gate>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    next_session_id: AtomicU64,
}

struct Gate {
    machine: StateMachine,
    generation: u64,
    current: Option<SourceValue>,
    pending: Option<SourceValue>,
    in_viewport: bool,
    lazy_enabled: bool,
    in_flight: Option<CancellationToken>,
}

/// 本地解析结果：可直接挂载的图片，或需要外部加载的引用。
enum LocalResolution {
    Ready(ImageHandle),
    External(Url),
}

impl ImageComponent {
    pub fn new(
        config: ImageConfig,
        host: Arc<dyn ImageHost>,
        loader: Arc<dyn ExternalLoader>,
    ) -> Result<Self, ImageError> {
        config.validate()?;
        let normalizer = SourceNormalizer::from_config(&config)?;

        let gate = Gate {
            machine: StateMachine::new(host),
            generation: 0,
            current: None,
            pending: None,
            in_viewport: false,
            lazy_enabled: config.enable_lazy_loading,
            in_flight: None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                normalizer,
                loader,
                gate: Mutex::new(gate),
                active: tokio::sync::Mutex::new(None),
                next_session_id: AtomicU64::new(0),
            }),
        })
    }

    /// 使用默认的 `PlatformLoader` 创建组件。
    pub fn with_platform_loader(config: ImageConfig, host: Arc<dyn ImageHost>) -> Result<Self, ImageError> {
        let loader = PlatformLoader::new(config.clone())?;
        Self::new(config, host, Arc::new(loader))
    }

    /// 赋值新来源（`None` 表示清空）。
    pub async fn set_source(&self, value: Option<SourceValue>) -> Assignment {
        let generation = {
            let mut gate = self.inner.gate();
            if gate.current == value {
                log::debug!("来源未变化，忽略赋值");
                return Assignment::Unchanged;
            }

            gate.generation += 1;
            gate.current = value.clone();
            gate.pending = None;

            if let Some(staged) = value.as_ref().filter(|_| gate.lazy_enabled && !gate.in_viewport) {
                log::info!("💤 组件不可见，暂存来源 - {}", staged.describe());
                gate.pending = Some(staged.clone());
                if let Some(token) = gate.in_flight.take() {
                    token.cancel();
                }
                if gate.machine.state() == LifecycleState::Loading {
                    gate.machine.detach();
                }
                return Assignment::Deferred;
            }

            gate.generation
        };

        self.inner.begin(generation, value).await
    }

    /// 可见性变化。变为可见时提升暂存来源并开始加载。
    pub async fn set_in_viewport(&self, in_viewport: bool) -> Option<Assignment> {
        let promoted = {
            let mut gate = self.inner.gate();
            gate.in_viewport = in_viewport;
            if in_viewport { gate.take_pending() } else { None }
        };

        let (generation, value) = promoted?;
        log::info!("👀 组件进入可见区域，开始加载暂存来源");
        Some(self.inner.begin(generation, Some(value)).await)
    }

    /// 开关懒加载。关闭时立即加载暂存来源。
    pub async fn set_lazy_loading_enabled(&self, enabled: bool) -> Option<Assignment> {
        let promoted = {
            let mut gate = self.inner.gate();
            gate.lazy_enabled = enabled;
            if enabled { None } else { gate.take_pending() }
        };

        let (generation, value) = promoted?;
        Some(self.inner.begin(generation, Some(value)).await)
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.gate().machine.state()
    }

    /// 最近一次赋值的来源（含暂存中的来源）。
    pub fn source(&self) -> Option<SourceValue> {
        self.inner.gate().current.clone()
    }

    pub fn pending_source(&self) -> Option<SourceValue> {
        self.inner.gate().pending.clone()
    }

    pub fn is_in_viewport(&self) -> bool {
        self.inner.gate().in_viewport
    }

    pub fn is_lazy_loading_enabled(&self) -> bool {
        self.inner.gate().lazy_enabled
    }

    pub fn config(&self) -> &ImageConfig {
        &self.inner.config
    }
}

impl Drop for ImageComponent {
    fn drop(&mut self) {
        if let Some(token) = self.inner.gate().in_flight.take() {
            token.cancel();
        }
    }
}

impl Gate {
    fn take_pending(&mut self) -> Option<(u64, SourceValue)> {
        self.pending.take().map(|value| (self.generation, value))
    }
}

impl Inner {
    fn gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn begin(self: &Arc<Self>, generation: u64, value: Option<SourceValue>) -> Assignment {
        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            self.supersede(previous).await;
        }

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let value = {
            let mut gate = self.gate();
            if gate.generation != generation {
                log::debug!("赋值在会话创建前已被取代（代数 {} → {}）", generation, gate.generation);
                return Assignment::Superseded;
            }

            gate.machine.detach();
            let Some(value) = value else {
                log::info!("🧹 会话 {} 清空来源", id);
                return Assignment::Started(SessionHandle::completed(id, SessionOutcome::Unloaded));
            };

            gate.machine.begin_loading();
            gate.in_flight = Some(cancel.clone());
            value
        };

        log::info!("🚀 会话 {} 开始 - {}", id, value.describe());

        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(Arc::clone(self).run_session(id, generation, value, cancel.clone(), tx));
        *active = Some(ActiveSession {
            id,
            cancel: cancel.clone(),
            task,
        });

        Assignment::Started(SessionHandle::new(id, cancel, rx))
    }

    /// 在门锁内发出取消信号，再等待旧会话确认退出。
    async fn supersede(&self, previous: ActiveSession) {
        {
            let mut gate = self.gate();
            previous.cancel.cancel();
            if gate
                .in_flight
                .as_ref()
                .is_some_and(|token| token.is_cancelled())
            {
                gate.in_flight = None;
            }
        }

        let id = previous.id;
        let outcome = previous.cancel_and_wait().await;
        log::debug!("🛑 会话 {} 已确认退出 - {:?}", id, outcome);
    }

    async fn run_session(
        self: Arc<Self>,
        id: u64,
        generation: u64,
        value: SourceValue,
        cancel: CancellationToken,
        tx: watch::Sender<Option<SessionOutcome>>,
    ) -> SessionOutcome {
        let start = Instant::now();

        let outcome = match self.resolve(&value, &cancel).await {
            Ok(image) => self.complete(id, generation, &cancel, image),
            Err(e) if e.is_cancelled() => {
                log::debug!("🛑 会话 {} 已取消：{}", id, e);
                SessionOutcome::Cancelled
            }
            Err(e) => self.fail(id, generation, &cancel, e),
        };

        log::info!(
            "✅ 会话 {} 结束 - {:?} total={}ms",
            id,
            outcome,
            start.elapsed().as_millis()
        );

        tx.send_replace(Some(outcome.clone()));
        outcome
    }

    async fn resolve(&self, value: &SourceValue, cancel: &CancellationToken) -> Result<ImageHandle, ImageError> {
        let local = match value {
            SourceValue::Text(text) if text.len() > self.config.inline_decode_limit => {
                log::debug!("⏳ 文本来源较大（{} bytes），转到阻塞线程解码", text.len());
                let normalizer = self.normalizer.clone();
                let value = value.clone();
                tokio::task::spawn_blocking(move || resolve_locally(&normalizer, &value))
                    .await
                    .map_err(|e| ImageError::Decode(format!("解码任务异常退出：{}", e)))??
            }
            _ => resolve_locally(&self.normalizer, value)?,
        };

        let url = match local {
            LocalResolution::Ready(image) => return Ok(image),
            LocalResolution::External(url) => url,
        };

        if cancel.is_cancelled() {
            return Err(ImageError::Cancelled("会话已被取代".to_string()));
        }

        log::debug!("📡 交给外部加载器 - {}", redact_url_for_log(&url));
        let use_cache = self.config.is_cache_enabled;
        let image = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ImageError::Cancelled("会话已被取代".to_string())),
            result = self.loader.load_from_reference(&url, use_cache, cancel) => result?,
        };

        Ok(Arc::new(image))
    }

    fn complete(
        &self,
        id: u64,
        generation: u64,
        cancel: &CancellationToken,
        image: ImageHandle,
    ) -> SessionOutcome {
        let mut gate = self.gate();
        if cancel.is_cancelled() || gate.generation != generation {
            log::debug!("🛑 会话 {} 在挂载前被取代", id);
            return SessionOutcome::Cancelled;
        }

        gate.in_flight = None;
        match gate.machine.attach(id, image) {
            LifecycleState::Loaded => SessionOutcome::Loaded,
            _ => SessionOutcome::Unloaded,
        }
    }

    fn fail(&self, id: u64, generation: u64, cancel: &CancellationToken, error: ImageError) -> SessionOutcome {
        let mut gate = self.gate();
        if cancel.is_cancelled() || gate.generation != generation {
            log::debug!("🛑 会话 {} 在上报失败前被取代", id);
            return SessionOutcome::Cancelled;
        }

        log::warn!("❌ 会话 {} 失败 [{}/{}]：{}", id, error.stage(), error.code(), error);
        gate.in_flight = None;
        gate.machine.fail(id, &error);
        SessionOutcome::Failed { code: error.code() }
    }
}

fn resolve_locally(normalizer: &SourceNormalizer, value: &SourceValue) -> Result<LocalResolution, ImageError> {
    match normalizer.normalize(value)? {
        ResolvedSource::Image(image) => Ok(LocalResolution::Ready(image)),
        ResolvedSource::Embedded(payload) => {
            Ok(LocalResolution::Ready(Arc::new(ImageData::from_payload(payload)?)))
        }
        ResolvedSource::Reference(url) if url.scheme() == "data" => {
            let payload = normalizer.embedded_from_reference(&url)?;
            Ok(LocalResolution::Ready(Arc::new(ImageData::from_payload(payload)?)))
        }
        ResolvedSource::Reference(url) => Ok(LocalResolution::External(url)),
    }
}
