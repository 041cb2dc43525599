//! # 图片来源解析模块（image_source）
//!
//! ## 设计思路
//!
//! 该模块将"来源赋值 → 规范化 → 内嵌数据解码 / 外部加载 → 挂载 + 状态通知"
//! 按职责拆分为多个子模块，避免单文件膨胀与耦合。
//!
//! - `component`：编排会话、懒加载与取消
//! - `session`：会话句柄与结果
//! - `state`：生命周期状态机
//! - `normalizer`：来源规范化（句柄 / 内嵌数据 / 引用）
//! - `decoder`：Base64 / 十六进制 / `data:` 内嵌数据解码
//! - `sniffer`：无 MIME 提示时的 SVG 嗅探
//! - `pipeline`：从编码字节构造 `ImageData`（读取头部尺寸）
//! - `loader`：外部加载器接口与默认实现
//! - `host`：显示层接口与事件
//! - `config/error/source/scratch`：配置、错误、中间数据模型、临时缓冲池
//!
//! ## 新同事快速上手
//!
//! 可以按下面顺序理解调用链：
//!
//! ```text
//! ImageComponent::set_source
//!    ↓
//! component.rs（去重 / 懒加载暂存 / 取消旧会话）
//!    ↓
//! normalizer.rs（规范化）
//!    ├─ decoder.rs + sniffer.rs（内嵌数据）
//!    ├─ pipeline.rs（构造 ImageData）
//!    └─ loader.rs（外部引用，可取消）
//!    ↓
//! state.rs → ImageHost（attach / notify_state / emit）
//! ```

mod component;
mod config;
mod decoder;
mod error;
mod host;
mod loader;
mod normalizer;
mod pipeline;
mod scratch;
mod session;
mod sniffer;
mod source;
mod state;

pub use component::{Assignment, ImageComponent};
pub use config::{DEFAULT_APP_ROOT, ImageConfig};
pub use decoder::{Base64Alphabet, PayloadDecoder, TRIAL_BUFFER_LEN, decode, decode_percent_escaped};
pub use error::ImageError;
pub use host::{ChannelHost, HostCall, ImageEvent, ImageHost};
pub use loader::{ExternalLoader, PlatformLoader};
pub use normalizer::SourceNormalizer;
pub use session::{SessionHandle, SessionOutcome};
pub use sniffer::{SVG_MIME, is_vector_mime, raster_mime, sniff};
pub use source::{DecodedPayload, ImageData, ImageHandle, MediaKind, ResolvedSource, SourceValue};
pub use state::LifecycleState;
