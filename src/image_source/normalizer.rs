//! # 来源规范化
//!
//! ## 设计思路
//!
//! 把一次来源赋值变成三种确定形态之一，不做任何 I/O：
//! - 句柄：原样交给挂载
//! - 内嵌数据：文本优先尝试解码，成功即为内嵌数据
//! - 引用：绝对 URI 原样保留；相对路径去掉开头的 `/` 后拼到应用根地址下
//!
//! 既不是内嵌数据也无法解析为 URI 的文本统一返回 `ImageError::InvalidFormat`。

use reqwest::Url;
use url::ParseError;

use super::config::ImageConfig;
use super::decoder::PayloadDecoder;
use super::source::{DecodedPayload, ResolvedSource, SourceValue};
use super::ImageError;

const INVALID_URI: &str = "Invalid uri specified.";

/// 来源规范化器，创建后只读，可在任务间共享。
#[derive(Debug, Clone)]
pub struct SourceNormalizer {
    decoder: PayloadDecoder,
    app_root: Url,
}

impl SourceNormalizer {
    pub fn new(decoder: PayloadDecoder, app_root: Url) -> Self {
        Self { decoder, app_root }
    }

    pub fn from_config(config: &ImageConfig) -> Result<Self, ImageError> {
        Ok(Self::new(
            PayloadDecoder::with_trial_len(config.trial_buffer_len),
            config.app_root_url()?,
        ))
    }

    pub fn app_root(&self) -> &Url {
        &self.app_root
    }

    pub fn decoder(&self) -> &PayloadDecoder {
        &self.decoder
    }

    /// 规范化一次来源赋值。
    ///
    /// # 示例
    /// ```rust
    /// use image_source_resolver::image_source::{
    ///     ImageConfig, ResolvedSource, SourceNormalizer, SourceValue,
    /// };
    ///
    /// let normalizer = SourceNormalizer::from_config(&ImageConfig::default())?;
    /// let resolved = normalizer.normalize(&SourceValue::from("/assets/logo.png"))?;
    /// assert!(matches!(resolved, ResolvedSource::Reference(url) if url.as_str() == "app:///assets/logo.png"));
    /// # Ok::<(), image_source_resolver::image_source::ImageError>(())
    /// ```
    pub fn normalize(&self, value: &SourceValue) -> Result<ResolvedSource, ImageError> {
        match value {
            SourceValue::Handle(image) => Ok(ResolvedSource::Image(image.clone())),
            SourceValue::Uri(url) => Ok(ResolvedSource::Reference(url.clone())),
            SourceValue::Text(text) => self.normalize_text(text),
        }
    }

    /// 解码 `data:` 引用。调用方保证 scheme 为 `data`。
    pub fn embedded_from_reference(&self, url: &Url) -> Result<DecodedPayload, ImageError> {
        self.decoder.decode(url.as_str())?.ok_or_else(|| {
            ImageError::Decode("data URI 缺少数据段".to_string())
        })
    }

    fn normalize_text(&self, text: &str) -> Result<ResolvedSource, ImageError> {
        if let Some(payload) = self.decoder.decode(text)? {
            return Ok(ResolvedSource::Embedded(payload));
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(ImageError::InvalidFormat(INVALID_URI.to_string()));
        }

        match Url::parse(text) {
            Ok(url) => Ok(ResolvedSource::Reference(url)),
            Err(ParseError::RelativeUrlWithoutBase) => {
                let url = self
                    .app_root
                    .join(text.trim_start_matches('/'))
                    .map_err(|_| ImageError::InvalidFormat(INVALID_URI.to_string()))?;
                log::debug!("🔗 相对路径已改写到应用根地址 - {}", url);
                Ok(ResolvedSource::Reference(url))
            }
            Err(e) => {
                log::debug!("⚠️ 无法解析 URI：{}", e);
                Err(ImageError::InvalidFormat(INVALID_URI.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_source::{ImageData, MediaKind};
    use std::sync::Arc;

    fn normalizer() -> SourceNormalizer {
        SourceNormalizer::from_config(&ImageConfig::default()).expect("normalizer")
    }

    fn reference(value: impl Into<SourceValue>) -> String {
        match normalizer().normalize(&value.into()).expect("normalize") {
            ResolvedSource::Reference(url) => url.to_string(),
            other => panic!("expected reference, got {:?}", other),
        }
    }

    #[test]
    fn handles_pass_through_without_decoding() {
        let image = Arc::new(ImageData::new(1, 1, MediaKind::Raster, "image/png", bytes::Bytes::new()));
        let resolved = normalizer()
            .normalize(&SourceValue::Handle(image.clone()))
            .expect("normalize");
        assert!(matches!(resolved, ResolvedSource::Image(handle) if Arc::ptr_eq(&handle, &image)));
    }

    #[test]
    fn absolute_uris_are_kept() {
        assert_eq!(reference("https://example.com/a.png?x=1"), "https://example.com/a.png?x=1");
        assert_eq!(reference("ftp://example.com/a.png"), "ftp://example.com/a.png");

        let url = Url::parse("file:///tmp/a.png").expect("url");
        assert_eq!(reference(url), "file:///tmp/a.png");
    }

    #[test]
    fn relative_paths_are_rewritten_under_app_root() {
        assert_eq!(reference("/assets/logo.png"), "app:///assets/logo.png");
        assert_eq!(reference("assets/logo.png"), "app:///assets/logo.png");
        assert_eq!(reference("  icon.png  "), "app:///icon.png");
    }

    #[test]
    fn custom_app_root_is_used() {
        let config = ImageConfig {
            app_root: "https://cdn.example.com/app/".to_string(),
            ..ImageConfig::default()
        };
        let normalizer = SourceNormalizer::from_config(&config).expect("normalizer");
        let resolved = normalizer
            .normalize(&SourceValue::from("/img/a.png"))
            .expect("normalize");
        assert!(
            matches!(resolved, ResolvedSource::Reference(url) if url.as_str() == "https://cdn.example.com/app/img/a.png")
        );
    }

    #[test]
    fn embedded_text_has_priority_over_uri() {
        let resolved = normalizer()
            .normalize(&SourceValue::from("data:image/svg+xml,<svg/>"))
            .expect("normalize");
        assert!(matches!(resolved, ResolvedSource::Embedded(payload) if payload.bytes() == b"<svg/>"));
    }

    #[test]
    fn standard_base64_text_is_embedded_not_relative() {
        let resolved = normalizer()
            .normalize(&SourceValue::from("+/+/AAE="))
            .expect("normalize");
        assert!(
            matches!(resolved, ResolvedSource::Embedded(payload) if payload.bytes() == [0xFB, 0xFF, 0xBF, 0x00, 0x01])
        );
    }

    #[test]
    fn decode_errors_are_propagated() {
        let result = normalizer().normalize(&SourceValue::from("data:image/png,%FF"));
        assert!(matches!(result, Err(ImageError::Decode(_))));
    }

    #[test]
    fn unparseable_text_is_a_format_error() {
        for text in ["http://", "", "   ", "http://exa mple.com/a.png"] {
            let result = normalizer().normalize(&SourceValue::from(text));
            assert_eq!(
                result.err(),
                Some(ImageError::InvalidFormat(INVALID_URI.to_string())),
                "input {:?}",
                text
            );
        }
    }

    #[test]
    fn uri_values_are_not_decoded_here() {
        let url = Url::parse("data:image/svg+xml,%3Csvg/%3E").expect("url");
        let resolved = normalizer().normalize(&SourceValue::Uri(url.clone())).expect("normalize");
        assert!(matches!(&resolved, ResolvedSource::Reference(u) if *u == url));

        let payload = normalizer().embedded_from_reference(&url).expect("decode");
        assert_eq!(payload.bytes(), b"<svg/>");
        assert_eq!(payload.mime_type(), Some("image/svg+xml"));
    }
}
