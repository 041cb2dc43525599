//! # MIME 嗅探
//!
//! 内嵌数据没有 MIME 提示时，根据字节开头判断是否为 SVG 文本。
//! 只检查前 `SNIFF_WINDOW` 字节；跳过 XML 声明（`<?...?>`）与注释/文档类型（`<!...>`）。

/// SVG 的 MIME 类型。
pub const SVG_MIME: &str = "image/svg+xml";

const SNIFF_WINDOW: usize = 128;
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// 判断字节是否像 SVG 文本，是则返回 `image/svg+xml`。
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    let window = window.strip_prefix(UTF8_BOM).unwrap_or(window);

    let mut pos = 0;
    loop {
        pos = skip_while(window, pos, is_blank_or_control);
        if window.get(pos) != Some(&b'<') {
            return None;
        }
        pos = skip_while(window, pos + 1, is_blank_or_control);

        match window.get(pos) {
            Some(b'?') | Some(b'!') => {
                let close = window[pos..].iter().position(|&b| b == b'>')?;
                pos += close + 1;
            }
            Some(_) => {
                let tag = window.get(pos..pos + 3)?;
                return tag.eq_ignore_ascii_case(b"svg").then_some(SVG_MIME);
            }
            None => return None,
        }
    }
}

/// 通过文件签名识别栅格图片 MIME。
pub fn raster_mime(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.mime_type())
}

/// MIME 是否表示矢量图（包含 `svg`，大小写不敏感）。
pub fn is_vector_mime(mime_type: &str) -> bool {
    mime_type.to_ascii_lowercase().contains("svg")
}

fn is_blank_or_control(byte: u8) -> bool {
    byte.is_ascii_whitespace() || byte.is_ascii_control()
}

fn skip_while(bytes: &[u8], mut pos: usize, pred: impl Fn(u8) -> bool) -> usize {
    while pos < bytes.len() && pred(bytes[pos]) {
        pos += 1;
    }
    pos
}
