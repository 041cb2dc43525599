//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有"可调策略"集中到 `ImageConfig`：懒加载、缓存、应用根地址、解码缓冲与外部加载限制。
//! 组件在创建时读取一次配置并校验，运行期行为保持一致。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的默认值。
//! - `#[serde(default)]` 允许 JSON 配置文件只写需要覆盖的字段。
//! - `validate` 在入口处一次性检查取值范围，失败返回 `ImageError::InvalidFormat`。

use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::ImageError;
use super::decoder::TRIAL_BUFFER_LEN;

/// 相对路径来源被改写到的默认应用根地址。
pub const DEFAULT_APP_ROOT: &str = "app:///";

/// 图片来源解析配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// 组件不可见时是否暂存来源，等可见后再加载。
    pub enable_lazy_loading: bool,
    /// 是否允许外部加载器使用缓存（内嵌数据始终绕过缓存）。
    pub is_cache_enabled: bool,
    /// 相对路径来源的改写根地址。
    pub app_root: String,
    /// 应用根地址映射到的本地目录（默认加载器使用）。
    pub app_root_dir: Option<PathBuf>,
    /// 内嵌数据试探缓冲长度（字节），上限为 `TRIAL_BUFFER_LEN`。
    pub trial_buffer_len: usize,
    /// 文本来源超过该长度（字节）时，解码转移到阻塞线程池执行。
    pub inline_decode_limit: usize,
    /// 外部加载允许的最大文件体积（字节）。
    pub max_file_size: u64,
    /// 网络下载超时时间（秒）。
    pub download_timeout: u64,
    /// 建立连接超时时间（秒）。
    pub connect_timeout: u64,
    /// 下载分块读取超时时间（毫秒）。
    pub stream_chunk_timeout_ms: u64,
    /// 最大重定向次数。
    pub max_redirects: usize,
    /// 默认加载器的内存缓存条目数。
    pub cache_capacity: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enable_lazy_loading: false,
            is_cache_enabled: false,
            app_root: DEFAULT_APP_ROOT.to_string(),
            app_root_dir: None,
            trial_buffer_len: TRIAL_BUFFER_LEN,
            inline_decode_limit: 64 * 1024,
            max_file_size: 50 * 1024 * 1024,
            download_timeout: 30,
            connect_timeout: 8,
            stream_chunk_timeout_ms: 15_000,
            max_redirects: 5,
            cache_capacity: 64,
        }
    }
}

impl ImageConfig {
    /// 从 JSON 文件读取配置，缺省字段使用默认值。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use image_source_resolver::image_source::ImageConfig;
    ///
    /// let config = ImageConfig::load_from_path("image-source.json")?;
    /// assert!(config.trial_buffer_len > 0);
    /// # Ok::<(), image_source_resolver::image_source::ImageError>(())
    /// ```
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ImageError::FileSystem(format!("无法读取配置文件 {}：{}", path.display(), e))
        })?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ImageError::InvalidFormat(format!("配置文件解析失败：{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置取值范围。
    pub fn validate(&self) -> Result<(), ImageError> {
        if !(4..=TRIAL_BUFFER_LEN).contains(&self.trial_buffer_len) {
            return Err(ImageError::InvalidFormat(format!(
                "trial_buffer_len 必须在 4~{} 字节之间",
                TRIAL_BUFFER_LEN
            )));
        }
        if self.max_file_size == 0 {
            return Err(ImageError::InvalidFormat("max_file_size 不能为 0".to_string()));
        }
        if !(1..=600).contains(&self.download_timeout) {
            return Err(ImageError::InvalidFormat("download_timeout 必须在 1~600 秒之间".to_string()));
        }
        if !(1..=120).contains(&self.connect_timeout) {
            return Err(ImageError::InvalidFormat("connect_timeout 必须在 1~120 秒之间".to_string()));
        }
        if !(500..=120_000).contains(&self.stream_chunk_timeout_ms) {
            return Err(ImageError::InvalidFormat(
                "stream_chunk_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if self.max_redirects > 20 {
            return Err(ImageError::InvalidFormat("max_redirects 不能超过 20".to_string()));
        }
        if !(1..=4096).contains(&self.cache_capacity) {
            return Err(ImageError::InvalidFormat("cache_capacity 必须在 1~4096 之间".to_string()));
        }

        self.app_root_url().map(|_| ())
    }

    /// 解析应用根地址。根地址必须可作为相对路径的基准。
    pub fn app_root_url(&self) -> Result<Url, ImageError> {
        let url = Url::parse(&self.app_root)
            .map_err(|e| ImageError::InvalidFormat(format!("app_root 无效：{}", e)))?;

        if url.cannot_be_a_base() {
            return Err(ImageError::InvalidFormat(format!(
                "app_root 不能作为基准地址：{}",
                self.app_root
            )));
        }

        Ok(url)
    }
}
