//! # 图片构造流水线
//!
//! ## 设计思路
//!
//! 把"编码字节"变成可挂载的 `ImageData`，只读取头部尺寸，不做像素解码：
//! - 矢量图（SVG）：解析根元素 `<svg>` 的 `width` / `height`，缺失时回退到 `viewBox`，都没有则为 0x0。
//! - 栅格图：文件签名校验（`infer`）后由 `image` 读取头部尺寸。
//!
//! ## 矢量/栅格判定
//!
//! 有 MIME 提示时只看提示是否包含 `svg`，没有提示才对字节做 SVG 嗅探；路径以 `.svg` 结尾也按矢量处理。都不满足按栅格处理。

use std::io::Cursor;

use bytes::Bytes;

use super::ImageError;
use super::sniffer::{self, SVG_MIME};
use super::source::{DecodedPayload, ImageData, MediaKind};

const SVG_EXTENSION: &str = ".svg";

impl ImageData {
    pub fn new(
        width: u32,
        height: u32,
        kind: MediaKind,
        mime_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            width,
            height,
            kind,
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// 消费内嵌数据解码结果构造图片。
    pub fn from_payload(payload: DecodedPayload) -> Result<Self, ImageError> {
        let (mime_type, bytes) = payload.into_parts();
        Self::from_encoded(Bytes::from(bytes), mime_type.as_deref(), None)
    }

    /// 从编码字节构造图片。
    ///
    /// `mime_hint` 来自 `data:` 结构或 HTTP `Content-Type`，`path_hint` 来自引用路径。
    pub fn from_encoded(
        bytes: Bytes,
        mime_hint: Option<&str>,
        path_hint: Option<&str>,
    ) -> Result<Self, ImageError> {
        match determine_kind(&bytes, mime_hint, path_hint) {
            MediaKind::Vector => Self::from_svg(bytes),
            MediaKind::Raster => Self::from_raster(bytes),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// 宽高都大于 0 才能进入 Loaded。
    pub fn has_positive_size(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    fn from_raster(bytes: Bytes) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Decode("图片内容为空".to_string()));
        }

        let mime_type = sniffer::raster_mime(&bytes)
            .ok_or_else(|| ImageError::Decode("无法识别图片类型".to_string()))?;
        let (width, height) = inspect_dimensions_from_memory(&bytes)?;

        log::debug!("🖼️ 栅格图片头部解析完成 - {} {}x{}", mime_type, width, height);
        Ok(Self::new(width, height, MediaKind::Raster, mime_type, bytes))
    }

    fn from_svg(bytes: Bytes) -> Result<Self, ImageError> {
        let (width, height) = inspect_svg_dimensions(&bytes)?;

        log::debug!("🖼️ SVG 根元素解析完成 - {}x{}", width, height);
        Ok(Self::new(width, height, MediaKind::Vector, SVG_MIME, bytes))
    }
}

fn determine_kind(bytes: &[u8], mime_hint: Option<&str>, path_hint: Option<&str>) -> MediaKind {
    // 有提示时以提示为准，嗅探只在没有提示时进行
    let content_vector = match mime_hint {
        Some(mime_type) => sniffer::is_vector_mime(mime_type),
        None => sniffer::sniff(bytes).is_some(),
    };
    let path_vector = path_hint.is_some_and(|path| {
        path.len()
            .checked_sub(SVG_EXTENSION.len())
            .and_then(|start| path.get(start..))
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SVG_EXTENSION))
    });

    if content_vector || path_vector {
        MediaKind::Vector
    } else {
        MediaKind::Raster
    }
}

/// 仅通过内存中的图片头信息读取宽高。
fn inspect_dimensions_from_memory(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::Decode(format!("无法识别图片格式：{}", e)))?;

    reader
        .into_dimensions()
        .map_err(|e| ImageError::Decode(format!("无法读取图片尺寸：{}", e)))
}

fn inspect_svg_dimensions(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ImageError::Decode("SVG 内容不是有效的 UTF-8".to_string()))?;
    let text = text.trim_start_matches('\u{feff}');

    let doc = roxmltree::Document::parse(text)
        .map_err(|e| ImageError::Decode(format!("SVG 解析失败：{}", e)))?;
    let root = doc.root_element();
    if !root.tag_name().name().eq_ignore_ascii_case("svg") {
        return Err(ImageError::Decode(format!(
            "SVG 根元素无效：<{}>",
            root.tag_name().name()
        )));
    }

    let view_box = root.attribute("viewBox").and_then(parse_svg_view_box);
    let width = root
        .attribute("width")
        .and_then(parse_svg_length_px)
        .or(view_box.map(|(w, _)| w))
        .unwrap_or(0.0);
    let height = root
        .attribute("height")
        .and_then(parse_svg_length_px)
        .or(view_box.map(|(_, h)| h))
        .unwrap_or(0.0);

    Ok((to_pixels(width), to_pixels(height)))
}

/// 解析 SVG 长度为 CSS 像素；百分比与未知单位返回 `None`。
fn parse_svg_length_px(value: &str) -> Option<f32> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.ends_with('%') {
        return None;
    }

    let mut end = 0;
    for (idx, ch) in trimmed.char_indices() {
        if matches!(ch, '0'..='9' | '+' | '-' | '.' | 'e' | 'E') {
            end = idx + ch.len_utf8();
        } else {
            break;
        }
    }
    if end == 0 {
        return None;
    }

    let number = trimmed[..end].parse::<f32>().ok()?;
    if !number.is_finite() {
        return None;
    }

    let unit = trimmed[end..].trim_start().to_ascii_lowercase();
    let factor = match unit.as_str() {
        "" | "px" => 1.0,
        "pt" => 96.0 / 72.0,
        "pc" => 16.0,
        "in" => 96.0,
        "cm" => 96.0 / 2.54,
        "mm" => 96.0 / 25.4,
        _ => return None,
    };

    Some(number * factor)
}

fn parse_svg_view_box(value: &str) -> Option<(f32, f32)> {
    let mut nums = value
        .split(|ch: char| ch.is_whitespace() || ch == ',')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<f32>().ok());

    let _min_x = nums.next()??;
    let _min_y = nums.next()??;
    let width = nums.next()??;
    let height = nums.next()??;

    (width.is_finite() && height.is_finite()).then_some((width, height))
}

fn to_pixels(value: f32) -> u32 {
    // 负数与 NaN 饱和为 0
    value.round() as u32
}
