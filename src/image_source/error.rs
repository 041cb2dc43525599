//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载"来源规范化 → 内嵌数据解码 → 外部加载 → 挂载"链路中的所有错误，
//! 避免字符串拼接式错误处理。通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! ## 分类约定
//!
//! - `InvalidFormat`：文本既不是可解码的内嵌数据，也不是可解析的 URI（不重试）
//! - `Decode`：已识别 `data:` 结构但所有解码器均失败，或字节不是可识别的图片
//! - `Network` / `Timeout` / `FileSystem` / `ResourceLimit` / `Unsupported`：外部加载器错误，原样上报
//! - `Cancelled`：会话被新请求取代，静默吞掉，不进入 Failed

use serde::Serialize;

/// 图片来源解析统一错误类型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("解码错误：{0}")]
    Decode(String),

    #[error("网络错误：{0}")]
    Network(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("不支持的来源：{0}")]
    Unsupported(String),

    #[error("已取消：{0}")]
    Cancelled(String),
}

impl ImageError {
    /// 稳定错误码，供宿主做样式/文案映射。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "E_FORMAT",
            Self::Decode(_) => "E_DECODE",
            Self::Network(_) => "E_NETWORK",
            Self::Timeout(_) => "E_TIMEOUT",
            Self::FileSystem(_) => "E_FILE",
            Self::ResourceLimit(_) => "E_LIMIT",
            Self::Unsupported(_) => "E_UNSUPPORTED",
            Self::Cancelled(_) => "E_CANCELLED",
        }
    }

    /// 错误发生的阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "normalize",
            Self::Decode(_) => "decode",
            Self::Network(_)
            | Self::Timeout(_)
            | Self::FileSystem(_)
            | Self::ResourceLimit(_)
            | Self::Unsupported(_) => "load",
            Self::Cancelled(_) => "cancel",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// 事件负载与 CLI 输出需要可序列化的错误，统一序列化为可读字符串。
impl Serialize for ImageError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
