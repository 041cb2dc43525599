//! # 内嵌数据解码模块
//!
//! ## 设计思路
//!
//! 把任意字符串当作可能的内嵌二进制数据解析，不要求显式 scheme。按顺序尝试，先成功者胜出：
//!
//! 1. 纯 Base64（标准或 URL 安全字母表，按特征字符选择，填充可选）
//! 2. 纯十六进制（去首尾空白后长度为偶数）
//! 3. `data:<mime>,<payload>`：payload 依次尝试 Base64 → 十六进制 → 百分号转义文本
//!
//! 一旦识别出 `data:` + 逗号结构，解码失败即为最终结果（`ImageError::Decode`），不再回退为 URI。
//!
//! ## 实现思路
//!
//! 目标是尽快失败，避免对无效输入做大块分配：
//! - 先用不超过 `TRIAL_BUFFER_LEN` 的栈上试探缓冲解码。
//! - 试探缓冲放得下：按实际长度分配并拷贝。
//! - 放不下但已消费前缀有效：按最坏长度分配完整缓冲，拷贝前缀，从断点继续解码到尾部。
//! - 结构性错误（残余 1 个字符、填充位置错误、试探前缀含非法字符）立即失败。
//!
//! 两个阶段调用同一个无状态解码原语（`Progress { status, consumed, written }`），原语可重入。

use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::{Engine as _, alphabet};

use super::ImageError;
use super::scratch::{SHARED_POOL, ScratchPool};
use super::source::DecodedPayload;

/// 试探缓冲的最大长度（字节）。
pub const TRIAL_BUFFER_LEN: usize = 1 << 10;

const DATA_SCHEME: &str = "data:";
const BASE64_FLAG: &str = "base64";

const PAD_INDIFFERENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, PAD_INDIFFERENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, PAD_INDIFFERENT);

#[cfg(test)]
thread_local! {
    static FULL_BUFFER_ALLOCATIONS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Base64 字母表。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base64Alphabet {
    /// `-` / `_`。
    UrlSafe,
    /// `+` / `/`。
    Standard,
}

impl Base64Alphabet {
    fn engine(self) -> &'static GeneralPurpose {
        match self {
            Self::UrlSafe => &URL_SAFE_LENIENT,
            Self::Standard => &STANDARD_LENIENT,
        }
    }

    /// 两种字母表都接受，按出现的特征字符选择。
    fn detect(input: &str) -> Self {
        if input.bytes().any(|b| b == b'+' || b == b'/') {
            Self::Standard
        } else {
            Self::UrlSafe
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Done,
    DestinationTooSmall,
    InvalidData,
}

/// 解码原语的单次执行结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Progress {
    status: Status,
    consumed: usize,
    written: usize,
}

impl Progress {
    fn done(consumed: usize, written: usize) -> Self {
        Self { status: Status::Done, consumed, written }
    }

    fn too_small(consumed: usize, written: usize) -> Self {
        Self { status: Status::DestinationTooSmall, consumed, written }
    }

    fn invalid() -> Self {
        Self { status: Status::InvalidData, consumed: 0, written: 0 }
    }
}

/// 内嵌数据解码器。
///
/// 无内部可变状态，可在多个线程间共享。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadDecoder {
    trial_len: usize,
}

impl Default for PayloadDecoder {
    fn default() -> Self {
        Self { trial_len: TRIAL_BUFFER_LEN }
    }
}

impl PayloadDecoder {
    /// 指定试探缓冲长度，取值被限制在 `1..=TRIAL_BUFFER_LEN`。
    pub fn with_trial_len(trial_len: usize) -> Self {
        Self {
            trial_len: trial_len.clamp(1, TRIAL_BUFFER_LEN),
        }
    }

    pub fn trial_len(&self) -> usize {
        self.trial_len
    }

    /// 解码入口。
    ///
    /// - `Ok(Some(_))`：识别为内嵌数据
    /// - `Ok(None)`：不是内嵌数据，调用方按普通 URI 处理
    /// - `Err(ImageError::Decode)`：识别出 `data:` 结构但数据段无法解码
    ///
    /// # 示例
    /// ```rust
    /// use image_source_resolver::image_source::PayloadDecoder;
    ///
    /// let decoder = PayloadDecoder::default();
    /// let payload = decoder.decode("data:image/svg+xml,<svg/>")?.expect("embedded");
    /// assert_eq!(payload.mime_type(), Some("image/svg+xml"));
    /// assert_eq!(payload.bytes(), b"<svg/>");
    ///
    /// assert!(decoder.decode("https://example.com/a.png")?.is_none());
    /// # Ok::<(), image_source_resolver::image_source::ImageError>(())
    /// ```
    pub fn decode(&self, input: &str) -> Result<Option<DecodedPayload>, ImageError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        if let Some(bytes) = self.decode_base64(trimmed, Base64Alphabet::detect(trimmed)) {
            log::debug!("🧬 识别为纯 Base64 内嵌数据 - {} bytes", bytes.len());
            return Ok(Some(DecodedPayload::new(None, bytes)));
        }

        if let Some(bytes) = self.decode_hex(trimmed) {
            log::debug!("🧬 识别为纯十六进制内嵌数据 - {} bytes", bytes.len());
            return Ok(Some(DecodedPayload::new(None, bytes)));
        }

        let Some(token) = input.find(DATA_SCHEME) else {
            return Ok(None);
        };
        let after_token = &input[token + DATA_SCHEME.len()..];
        let Some(comma) = after_token.find(',') else {
            return Ok(None);
        };

        let mime_type = parse_mime_hint(&after_token[..comma]);
        let segment = &after_token[comma + 1..];
        let segment_trimmed = segment.trim();

        let bytes = self
            .decode_base64(segment_trimmed, Base64Alphabet::detect(segment_trimmed))
            .or_else(|| self.decode_hex(segment_trimmed))
            .or_else(|| decode_percent_escaped(segment))
            .ok_or_else(|| {
                ImageError::Decode(format!(
                    "data 数据段无法解码（Base64 / 十六进制 / 百分号转义均失败），长度 {}",
                    segment.len()
                ))
            })?;

        log::debug!(
            "🧬 识别为 data URI - mime={:?} {} bytes",
            mime_type,
            bytes.len()
        );
        Ok(Some(DecodedPayload::new(mime_type, bytes)))
    }

    /// 整段 Base64 解码，失败返回 `None`。
    pub fn decode_base64(&self, input: &str, alphabet: Base64Alphabet) -> Option<Vec<u8>> {
        let input = input.as_bytes();
        base64_shape(input)?;

        let engine = alphabet.engine();
        self.decode_two_phase(input, base64_upper_bound_len(input.len()), |src, dst| {
            base64_into(engine, src, dst)
        })
    }

    /// 整段十六进制解码（先去首尾空白），失败返回 `None`。
    pub fn decode_hex(&self, input: &str) -> Option<Vec<u8>> {
        let input = input.trim().as_bytes();
        if input.is_empty() || input.len() % 2 != 0 {
            return None;
        }

        self.decode_two_phase(input, input.len() / 2, hex_into)
    }

    /// 试探缓冲 + 断点续解。
    fn decode_two_phase<F>(&self, input: &[u8], full_len: usize, primitive: F) -> Option<Vec<u8>>
    where
        F: Fn(&[u8], &mut [u8]) -> Progress,
    {
        let mut trial = [0u8; TRIAL_BUFFER_LEN];
        let trial = &mut trial[..self.trial_len.min(full_len)];

        let first = primitive(input, trial);
        match first.status {
            Status::Done => return Some(trial[..first.written].to_vec()),
            Status::InvalidData => return None,
            Status::DestinationTooSmall => {}
        }

        #[cfg(test)]
        FULL_BUFFER_ALLOCATIONS.with(|count| count.set(count.get() + 1));

        let mut buffer = vec![0u8; full_len];
        buffer[..first.written].copy_from_slice(&trial[..first.written]);

        let rest = primitive(&input[first.consumed..], &mut buffer[first.written..]);
        if rest.status != Status::Done {
            log::debug!(
                "⚠️ 内嵌数据续解失败，已丢弃 {} 字节完整缓冲",
                full_len
            );
            return None;
        }

        buffer.truncate(first.written + rest.written);
        Some(buffer)
    }
}

/// 使用默认试探缓冲长度解码。
pub fn decode(input: &str) -> Result<Option<DecodedPayload>, ImageError> {
    PayloadDecoder::default().decode(input)
}

/// 百分号转义文本解码：先反转义到租用的字符缓冲，再按 UTF-8 编码到精确长度的输出缓冲。
///
/// 非法的 `%` 序列按字面保留；反转义结果不是合法 UTF-8 时失败。
pub fn decode_percent_escaped(input: &str) -> Option<Vec<u8>> {
    decode_percent_escaped_with(&SHARED_POOL, input)
}

pub(crate) fn decode_percent_escaped_with(pool: &ScratchPool, input: &str) -> Option<Vec<u8>> {
    let mut scratch = pool.rent(input.len());
    unescape_into(input, &mut scratch)?;

    let mut bytes = Vec::with_capacity(scratch.len());
    bytes.extend_from_slice(scratch.as_bytes());
    Some(bytes)
}

/// Base64 最坏解码长度：每 4 个字符最多 3 字节。
fn base64_upper_bound_len(len: usize) -> usize {
    len.div_ceil(4).saturating_mul(3)
}

/// 结构校验，返回去掉填充后的长度。
fn base64_shape(input: &[u8]) -> Option<usize> {
    if input.is_empty() {
        return None;
    }

    let padding = input.iter().rev().take_while(|&&b| b == b'=').count();
    if padding > 2 || (padding > 0 && input.len() % 4 != 0) {
        return None;
    }

    let unpadded = input.len() - padding;
    if unpadded == 0 || unpadded % 4 == 1 {
        return None;
    }

    Some(unpadded)
}

fn base64_into(engine: &GeneralPurpose, input: &[u8], output: &mut [u8]) -> Progress {
    let Some(unpadded) = base64_shape(input) else {
        return Progress::invalid();
    };

    if base64_upper_bound_len(input.len()) <= output.len() {
        return match engine.decode_slice(input, output) {
            Ok(written) => Progress::done(input.len(), written),
            Err(_) => Progress::invalid(),
        };
    }

    // 只解完整的 4 字符组，并把最后一组留给续解阶段
    let quads = (output.len() / 3).min((unpadded - 1) / 4);
    let prefix = &input[..quads * 4];
    if prefix.contains(&b'=') {
        return Progress::invalid();
    }

    match engine.decode_slice(prefix, output) {
        Ok(written) => Progress::too_small(prefix.len(), written),
        Err(_) => Progress::invalid(),
    }
}

fn hex_into(input: &[u8], output: &mut [u8]) -> Progress {
    if input.len() % 2 != 0 {
        return Progress::invalid();
    }

    let needed = input.len() / 2;
    let take = needed.min(output.len());

    match hex::decode_to_slice(&input[..take * 2], &mut output[..take]) {
        Ok(()) if take == needed => Progress::done(input.len(), take),
        Ok(()) => Progress::too_small(take * 2, take),
        Err(_) => Progress::invalid(),
    }
}

/// `image/png;base64` → `image/png`；空媒体类型视为无提示。
fn parse_mime_hint(raw: &str) -> Option<String> {
    let mut parts = raw.split(';');
    let media_type = parts.next().unwrap_or("").trim();
    if media_type.is_empty() {
        return None;
    }

    let mut hint = media_type.to_string();
    for param in parts {
        let param = param.trim();
        if param.is_empty() || param.eq_ignore_ascii_case(BASE64_FLAG) {
            continue;
        }
        hint.push(';');
        hint.push_str(param);
    }

    Some(hint)
}

fn unescape_into(input: &str, out: &mut String) -> Option<()> {
    let bytes = input.as_bytes();
    let mut sequence = [0u8; 4];
    let mut sequence_len = 0;
    let mut sequence_width = 0;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(byte) = escaped_byte(bytes, i) {
            if sequence_len == 0 {
                sequence_width = utf8_width(byte);
                if sequence_width == 0 {
                    return None;
                }
            } else if byte & 0xC0 != 0x80 {
                return None;
            }

            sequence[sequence_len] = byte;
            sequence_len += 1;
            if sequence_len == sequence_width {
                out.push_str(std::str::from_utf8(&sequence[..sequence_len]).ok()?);
                sequence_len = 0;
            }
            i += 3;
            continue;
        }

        // 多字节字符被字面字符截断
        if sequence_len != 0 {
            return None;
        }

        let next = bytes[i + 1..]
            .iter()
            .position(|&b| b == b'%')
            .map_or(bytes.len(), |offset| i + 1 + offset);
        out.push_str(&input[i..next]);
        i = next;
    }

    (sequence_len == 0).then_some(())
}

fn escaped_byte(bytes: &[u8], i: usize) -> Option<u8> {
    if bytes[i] != b'%' || i + 2 >= bytes.len() {
        return None;
    }

    let hi = (bytes[i + 1] as char).to_digit(16)?;
    let lo = (bytes[i + 2] as char).to_digit(16)?;
    Some(((hi << 4) | lo) as u8)
}

fn utf8_width(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose;

    fn full_buffer_allocations() -> usize {
        FULL_BUFFER_ALLOCATIONS.with(|count| count.get())
    }

    fn sample_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn small_base64_decodes_within_trial_buffer() {
        let before = full_buffer_allocations();
        let payload = decode("SGVsbG8").expect("decode").expect("embedded");

        assert_eq!(payload.bytes(), b"Hello");
        assert_eq!(payload.mime_type(), None);
        assert_eq!(full_buffer_allocations(), before);
    }

    #[test]
    fn padded_and_unpadded_base64_are_equivalent() {
        let padded = decode("SGVsbG8=").expect("decode").expect("embedded");
        let unpadded = decode("SGVsbG8").expect("decode").expect("embedded");
        assert_eq!(padded, unpadded);
    }

    #[test]
    fn large_base64_resumes_into_full_buffer() {
        let bytes = sample_bytes(5000);
        let encoded = general_purpose::URL_SAFE_NO_PAD.encode(&bytes);

        let before = full_buffer_allocations();
        let payload = decode(&encoded).expect("decode").expect("embedded");

        assert_eq!(payload.bytes(), bytes.as_slice());
        assert_eq!(full_buffer_allocations(), before + 1);
    }

    #[test]
    fn resume_path_works_with_tiny_trial_buffer() {
        let decoder = PayloadDecoder::with_trial_len(4);
        let bytes = sample_bytes(100);
        let encoded = general_purpose::URL_SAFE.encode(&bytes);

        let decoded = decoder
            .decode_base64(&encoded, Base64Alphabet::UrlSafe)
            .expect("decode");
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn malformed_base64_fails_without_full_allocation() {
        // 残余 1 个字符 + 非法字符
        let input = format!("{}*", "QUJD".repeat(600));
        let before = full_buffer_allocations();

        assert_eq!(decode(&input).expect("no error"), None);
        assert_eq!(full_buffer_allocations(), before);
    }

    #[test]
    fn invalid_character_in_trial_prefix_fails_fast() {
        let input = format!("QU!D{}", "QUJD".repeat(600));
        let before = full_buffer_allocations();

        assert!(PayloadDecoder::default()
            .decode_base64(&input, Base64Alphabet::UrlSafe)
            .is_none());
        assert_eq!(full_buffer_allocations(), before);
    }

    #[test]
    fn invalid_character_after_trial_prefix_is_rejected() {
        let input = format!("{}!AAA", "QUJD".repeat(600));
        assert!(PayloadDecoder::default()
            .decode_base64(&input, Base64Alphabet::UrlSafe)
            .is_none());
    }

    #[test]
    fn misplaced_padding_is_rejected() {
        let decoder = PayloadDecoder::with_trial_len(4);
        assert!(decoder.decode_base64("QQ==QUJD", Base64Alphabet::UrlSafe).is_none());
        assert!(decoder.decode_base64("Q===", Base64Alphabet::UrlSafe).is_none());
        assert!(decoder.decode_base64("QQ=", Base64Alphabet::UrlSafe).is_none());
    }

    #[test]
    fn schemeless_text_accepts_standard_alphabet() {
        let payload = decode("+/+/AAE=").expect("no error").expect("embedded");
        assert_eq!(payload.mime_type(), None);
        assert_eq!(payload.bytes(), &[0xFB, 0xFF, 0xBF, 0x00, 0x01]);

        assert!(PayloadDecoder::default()
            .decode_base64("ab/c", Base64Alphabet::UrlSafe)
            .is_none());
    }

    #[test]
    fn hex_decodes_both_cases_and_trims() {
        let decoder = PayloadDecoder::default();
        assert_eq!(decoder.decode_hex("  DEADbeef \n"), Some(vec![0xDE, 0xAD, 0xBE, 0xEF]));
        assert_eq!(decoder.decode_hex("abc"), None);
        assert_eq!(decoder.decode_hex("zz"), None);
        assert_eq!(decoder.decode_hex(""), None);
    }

    #[test]
    fn large_hex_resumes_into_full_buffer() {
        let bytes = sample_bytes(3000);
        let encoded = hex::encode(&bytes);

        let decoded = PayloadDecoder::default().decode_hex(&encoded).expect("decode");
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn hex_wins_when_base64_rejects_trailing_bits() {
        // 长度 ≡ 2 (mod 4) 且最后一个字符低位非零：Base64 拒绝，十六进制接受
        let payload = decode("0a1f0a1f0f").expect("decode").expect("embedded");
        assert_eq!(payload.bytes(), &[0x0a, 0x1f, 0x0a, 0x1f, 0x0f]);
    }

    #[test]
    fn data_uri_with_literal_svg_keeps_mime_hint() {
        let input = r#"data:image/svg+xml,<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"></svg>"#;
        let payload = decode(input).expect("decode").expect("embedded");

        assert_eq!(payload.mime_type(), Some("image/svg+xml"));
        assert_eq!(
            payload.bytes(),
            br#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"></svg>"#
        );
    }

    #[test]
    fn data_uri_with_percent_escaped_svg_and_no_mime() {
        let payload = decode("data:,%3Csvg%3E%3C/svg%3E")
            .expect("decode")
            .expect("embedded");

        assert_eq!(payload.mime_type(), None);
        assert_eq!(payload.bytes(), b"<svg></svg>");
    }

    #[test]
    fn data_uri_base64_flag_is_removed_from_hint() {
        let encoded = general_purpose::STANDARD.encode([0xFFu8, 0xFE, 0xFD, 0x3F, 0xBF]);
        let input = format!("data:image/png;base64,{}", encoded);
        let payload = decode(&input).expect("decode").expect("embedded");

        assert_eq!(payload.mime_type(), Some("image/png"));
        assert_eq!(payload.bytes(), &[0xFF, 0xFE, 0xFD, 0x3F, 0xBF]);
    }

    #[test]
    fn data_uri_keeps_other_parameters() {
        let payload = decode("data:image/svg+xml;charset=utf-8,%3Csvg/%3E")
            .expect("decode")
            .expect("embedded");
        assert_eq!(payload.mime_type(), Some("image/svg+xml;charset=utf-8"));
    }

    #[test]
    fn undecodable_data_segment_is_a_decode_error() {
        let result = decode("data:image/png,%FF%FE");
        assert!(matches!(result, Err(ImageError::Decode(_))));
    }

    #[test]
    fn data_token_without_comma_is_not_embedded() {
        assert_eq!(decode("data:image/png").expect("no error"), None);
    }

    #[test]
    fn plain_urls_are_not_embedded() {
        assert_eq!(decode("https://example.com/a.png").expect("no error"), None);
        assert_eq!(decode("/assets/logo.png").expect("no error"), None);
        assert_eq!(decode("   ").expect("no error"), None);
    }

    #[test]
    fn percent_unescape_keeps_malformed_escapes_literally() {
        assert_eq!(
            decode_percent_escaped("width=\"100%\" %2").as_deref(),
            Some("width=\"100%\" %2".as_bytes())
        );
        assert_eq!(decode_percent_escaped("%E4%B8%AD").as_deref(), Some("中".as_bytes()));
        assert_eq!(decode_percent_escaped("+plus+"), Some(b"+plus+".to_vec()));
    }

    #[test]
    fn percent_unescape_rejects_broken_utf8() {
        assert_eq!(decode_percent_escaped("%E4%B8"), None);
        assert_eq!(decode_percent_escaped("%E4x%B8%AD"), None);
        assert_eq!(decode_percent_escaped("%80"), None);
    }

    #[test]
    fn scratch_buffer_is_returned_on_success_and_failure() {
        let pool = ScratchPool::new();

        assert!(decode_percent_escaped_with(&pool, "%3Csvg%3E").is_some());
        assert_eq!(pool.outstanding(), 0);

        assert!(decode_percent_escaped_with(&pool, "%FF").is_none());
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.retained(), 1);
    }

    #[test]
    fn decoded_output_is_exactly_sized() {
        let payload = decode("SGVsbG8").expect("decode").expect("embedded");
        let (_, bytes) = payload.into_parts();
        assert_eq!(bytes.len(), 5);
        assert!(bytes.capacity() >= bytes.len());
    }
}
