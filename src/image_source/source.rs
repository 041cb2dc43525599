//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将"外部输入类型"和"流水线中间结果"解耦：
//! - `SourceValue` 表示一次来源赋值（句柄 / URI / 文本），赋值后不可变
//! - `DecodedPayload` 表示内嵌数据解码结果，字节独占，由图片构造消费一次
//! - `ResolvedSource` 表示规范化后的可解析引用
//! - `ImageData` 表示可挂载到显示目标的图片

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::Url;
use serde::Serialize;

/// 已解析图片的共享句柄。
pub type ImageHandle = Arc<ImageData>;

/// 一次来源赋值。
#[derive(Debug, Clone)]
pub enum SourceValue {
    /// 已解析的图片句柄，直接挂载。
    Handle(ImageHandle),
    /// URI 值。
    Uri(Url),
    /// 任意文本（内嵌数据或 URI 字符串）。
    Text(String),
}

/// 句柄按引用同一性比较，其余按值比较。
impl PartialEq for SourceValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Handle(a), Self::Handle(b)) => Arc::ptr_eq(a, b),
            (Self::Uri(a), Self::Uri(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl SourceValue {
    /// 日志用的简短描述，避免把大段内嵌数据写进日志。
    pub fn describe(&self) -> String {
        match self {
            Self::Handle(image) => format!("handle({}x{})", image.width(), image.height()),
            Self::Uri(url) => format!("uri({})", redact_url_for_log(url)),
            Self::Text(text) if text.len() > 64 => format!("text({} bytes)", text.len()),
            Self::Text(text) => format!("text({})", text),
        }
    }
}

impl From<&str> for SourceValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SourceValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Url> for SourceValue {
    fn from(value: Url) -> Self {
        Self::Uri(value)
    }
}

impl From<ImageHandle> for SourceValue {
    fn from(value: ImageHandle) -> Self {
        Self::Handle(value)
    }
}

impl From<ImageData> for SourceValue {
    fn from(value: ImageData) -> Self {
        Self::Handle(Arc::new(value))
    }
}

/// 内嵌数据解码结果。
///
/// `bytes` 的长度即有效数据长度，容量不小于长度。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    mime_type: Option<String>,
    bytes: Vec<u8>,
}

impl DecodedPayload {
    pub(crate) fn new(mime_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self { mime_type, bytes }
    }

    /// `data:` 结构中给出的 MIME 提示。
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 转移字节所有权。
    pub fn into_parts(self) -> (Option<String>, Vec<u8>) {
        (self.mime_type, self.bytes)
    }
}

/// 规范化后的来源。
#[derive(Debug, Clone)]
pub enum ResolvedSource {
    /// 直接挂载的图片句柄。
    Image(ImageHandle),
    /// 已解码的内嵌数据。
    Embedded(DecodedPayload),
    /// 需要交给外部加载器的引用。
    Reference(Url),
}

/// 图片媒体类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Raster,
    Vector,
}

/// 可挂载到显示目标的图片。
///
/// 只记录头部尺寸与原始编码字节，像素解码与栅格化由宿主完成。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageData {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) kind: MediaKind,
    pub(crate) mime_type: String,
    #[serde(skip)]
    pub(crate) bytes: Bytes,
}

impl fmt::Display for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.mime_type, self.width, self.height)
    }
}

/// 日志中只保留 scheme/host/path，去掉查询参数与片段。
pub(crate) fn redact_url_for_log(url: &Url) -> String {
    if url.scheme() == "data" {
        return "data:<omitted>".to_string();
    }

    let host = url.host_str().unwrap_or("");
    let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();

    format!("{}://{}{}{}", url.scheme(), host, port, url.path())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32) -> ImageData {
        ImageData::new(width, height, MediaKind::Raster, "image/png", Bytes::new())
    }

    #[test]
    fn handles_compare_by_identity() {
        let shared: ImageHandle = Arc::new(image(1, 1));
        let a = SourceValue::Handle(Arc::clone(&shared));
        let b = SourceValue::Handle(shared);
        let c = SourceValue::from(image(1, 1));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn text_and_uri_compare_by_value() {
        assert_eq!(SourceValue::from("a.png"), SourceValue::from("a.png".to_string()));
        assert_ne!(SourceValue::from("a.png"), SourceValue::from("b.png"));

        let url = Url::parse("https://example.com/a.png").expect("url");
        assert_eq!(SourceValue::from(url.clone()), SourceValue::Uri(url));
    }

    #[test]
    fn describe_truncates_long_text() {
        let long = "A".repeat(1000);
        assert_eq!(SourceValue::from(long).describe(), "text(1000 bytes)");
    }

    #[test]
    fn redact_url_for_log_removes_query_and_fragment() {
        let url = Url::parse("https://example.com:8443/path/img.png?token=abc123#hash").expect("url");
        assert_eq!(redact_url_for_log(&url), "https://example.com:8443/path/img.png");
    }

    #[test]
    fn payload_exposes_exclusive_bytes() {
        let payload = DecodedPayload::new(Some("image/png".to_string()), vec![1, 2, 3]);
        assert_eq!(payload.len(), 3);
        assert_eq!(payload.mime_type(), Some("image/png"));

        let (mime, bytes) = payload.into_parts();
        assert_eq!(mime.as_deref(), Some("image/png"));
        assert_eq!(bytes, vec![1, 2, 3]);
    }
}
