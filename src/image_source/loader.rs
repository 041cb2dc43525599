//! # 外部加载模块
//!
//! ## 设计思路
//!
//! 组件只依赖 `ExternalLoader` 接口，把"引用 → 图片"交给宿主可替换的加载器。
//! 默认实现 `PlatformLoader` 覆盖常见 scheme，并在"尽可能早"的阶段执行输入校验，减少不必要的内存与 CPU 消耗。
//!
//! ## 实现思路
//!
//! - `http` / `https`：状态码 + 内容类型 + 体积校验 + 流式下载，每个分块都检查取消与超时。
//! - `file`：metadata 体积限制 + 读取。
//! - 应用根 scheme：映射到配置的本地目录，拒绝 `..` 路径段。
//! - 其他 scheme：`ImageError::Unsupported`。
//! - 只有调用方传入 `use_cache` 时才读写内存 LRU 缓存。

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use super::config::ImageConfig;
use super::decoder::decode_percent_escaped;
use super::source::{ImageData, redact_url_for_log};
use super::ImageError;

const BUFFER_INITIAL_CAPACITY: usize = 16 * 1024;

/// 把引用解析为图片的外部加载器。
///
/// 实现方应在挂起点检查 `cancel`，被取消时返回 `ImageError::Cancelled`。
#[async_trait]
pub trait ExternalLoader: Send + Sync {
    async fn load_from_reference(
        &self,
        url: &Url,
        use_cache: bool,
        cancel: &CancellationToken,
    ) -> Result<ImageData, ImageError>;
}

/// 默认加载器：HTTP(S)、本地文件与应用根目录。
pub struct PlatformLoader {
    config: ImageConfig,
    app_root: Url,
    client: reqwest::Client,
    cache: Mutex<LruCache<String, ImageData>>,
}

impl PlatformLoader {
    pub fn new(config: ImageConfig) -> Result<Self, ImageError> {
        config.validate()?;
        let app_root = config.app_root_url()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| ImageError::Network(format!("HTTP 客户端初始化失败：{}", e)))?;

        let capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or_else(|| ImageError::InvalidFormat("cache_capacity 不能为 0".to_string()))?;

        Ok(Self {
            config,
            app_root,
            client,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    async fn load_uncached(&self, url: &Url, cancel: &CancellationToken) -> Result<ImageData, ImageError> {
        match url.scheme() {
            "http" | "https" => self.load_from_http(url, cancel).await,
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| ImageError::FileSystem(format!("无效的文件路径：{}", url.path())))?;
                self.load_from_file(&path, cancel).await
            }
            scheme if scheme == self.app_root.scheme() => {
                let path = self.resolve_app_path(url)?;
                self.load_from_file(&path, cancel).await
            }
            scheme => Err(ImageError::Unsupported(format!("不支持的 scheme：{}", scheme))),
        }
    }

    async fn load_from_http(&self, url: &Url, cancel: &CancellationToken) -> Result<ImageData, ImageError> {
        ensure_not_cancelled(cancel)?;
        log::info!("🌐 开始下载图片 - URL: {}", redact_url_for_log(url));

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e, url))?;

        if !response.status().is_success() {
            return Err(ImageError::Network(format!(
                "HTTP {}: {}",
                response.status().as_u16(),
                status_message(response.status().as_u16())
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(str::to_string);
        if let Some(ct) = content_type.as_deref() {
            if !is_image_content_type(ct) {
                return Err(ImageError::Decode(format!("不是图片类型：{}", ct)));
            }
        }

        let total_len = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|cl| cl.to_str().ok())
            .and_then(|cl| cl.parse::<u64>().ok());
        if let Some(size) = total_len {
            if size > self.config.max_file_size {
                return Err(ImageError::ResourceLimit(format!(
                    "文件过大：{:.2} MB（限制：{:.2} MB）",
                    size as f64 / 1024.0 / 1024.0,
                    self.config.max_file_size as f64 / 1024.0 / 1024.0
                )));
            }
        }

        let initial_capacity = total_len
            .map(|len| len.min(self.config.max_file_size).min(usize::MAX as u64) as usize)
            .filter(|len| *len > 0)
            .unwrap_or(BUFFER_INITIAL_CAPACITY);
        let mut buffer = Vec::with_capacity(initial_capacity);
        let mut total: u64 = 0;
        let read_timeout = Duration::from_millis(self.config.stream_chunk_timeout_ms);

        loop {
            let next_chunk = tokio::time::timeout(read_timeout, response.chunk())
                .await
                .map_err(|_| ImageError::Timeout("下载数据流读取超时".to_string()))?;

            let Some(chunk) = next_chunk.map_err(|e| ImageError::Network(format!("下载失败：{}", e)))? else {
                break;
            };

            ensure_not_cancelled(cancel)?;

            total = total.saturating_add(chunk.len() as u64);
            if total > self.config.max_file_size {
                return Err(ImageError::ResourceLimit("下载后文件超过大小限制".to_string()));
            }
            buffer.extend_from_slice(&chunk);
        }

        log::debug!("✅ 下载完成 - {} bytes", total);
        ImageData::from_encoded(Bytes::from(buffer), content_type.as_deref(), Some(url.path()))
    }

    async fn load_from_file(&self, path: &Path, cancel: &CancellationToken) -> Result<ImageData, ImageError> {
        ensure_not_cancelled(cancel)?;

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ImageError::FileSystem(format!("无法访问文件 {}：{}", path.display(), e)))?;
        if !metadata.is_file() {
            return Err(ImageError::FileSystem(format!("不是文件：{}", path.display())));
        }
        if metadata.len() > self.config.max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "文件过大：{} bytes（限制：{} bytes）",
                metadata.len(),
                self.config.max_file_size
            )));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ImageError::FileSystem(format!("读取文件失败 {}：{}", path.display(), e)))?;
        ensure_not_cancelled(cancel)?;

        log::debug!("📁 读取本地文件完成 - {} ({} bytes)", path.display(), bytes.len());
        ImageData::from_encoded(Bytes::from(bytes), None, path.to_str())
    }

    /// 应用根地址下的路径 → 本地目录下的文件。
    fn resolve_app_path(&self, url: &Url) -> Result<PathBuf, ImageError> {
        let root_dir = self
            .config
            .app_root_dir
            .as_ref()
            .ok_or_else(|| ImageError::Unsupported(format!("未配置应用根目录：{}", redact_url_for_log(url))))?;

        let relative = url
            .path()
            .strip_prefix(self.app_root.path())
            .unwrap_or(url.path())
            .trim_start_matches('/');
        let decoded = decode_percent_escaped(relative)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| ImageError::FileSystem(format!("无效的应用路径：{}", relative)))?;

        let mut path = root_dir.clone();
        for segment in decoded.split('/').filter(|s| !s.is_empty() && *s != ".") {
            if segment == ".." || segment.contains('\\') {
                return Err(ImageError::FileSystem(format!("应用路径越界：{}", decoded)));
            }
            path.push(segment);
        }

        Ok(path)
    }

    fn cached(&self, key: &str) -> Option<ImageData> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn store(&self, key: &str, image: &ImageData) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key.to_string(), image.clone());
    }

    /// 统一映射 reqwest 错误到业务错误。
    fn map_reqwest_error(&self, e: reqwest::Error, url: &Url) -> ImageError {
        let err_msg = sanitize_error_message_with_redacted_url(&e.to_string(), url);

        if e.is_timeout() {
            ImageError::Timeout(format!("下载超时（{}秒）", self.config.download_timeout))
        } else if e.is_connect() {
            ImageError::Network(format!("无法连接：{}", err_msg))
        } else if e.is_redirect() {
            ImageError::Network(format!("重定向次数超过限制（{}）", self.config.max_redirects))
        } else {
            ImageError::Network(format!("请求失败：{}", err_msg))
        }
    }
}

#[async_trait]
impl ExternalLoader for PlatformLoader {
    async fn load_from_reference(
        &self,
        url: &Url,
        use_cache: bool,
        cancel: &CancellationToken,
    ) -> Result<ImageData, ImageError> {
        if use_cache {
            if let Some(image) = self.cached(url.as_str()) {
                log::debug!("⚡ 命中图片缓存 - {}", redact_url_for_log(url));
                return Ok(image);
            }
        }

        let image = self.load_uncached(url, cancel).await?;

        if use_cache {
            self.store(url.as_str(), &image);
        }
        Ok(image)
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), ImageError> {
    if cancel.is_cancelled() {
        return Err(ImageError::Cancelled("图片加载已取消".to_string()));
    }
    Ok(())
}

fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|base| base.trim().to_ascii_lowercase().starts_with("image/"))
        .unwrap_or(false)
}

fn sanitize_error_message_with_redacted_url(error_msg: &str, url: &Url) -> String {
    error_msg.replace(url.as_str(), &redact_url_for_log(url))
}

/// 常见 HTTP 状态码本地化文案。
fn status_message(code: u16) -> &'static str {
    match code {
        404 => "未找到",
        403 => "访问被拒绝",
        500..=599 => "服务器错误",
        _ => "请求失败",
    }
}
