//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 命令行入口统一返回 `Result<T, AppError>`，替代分散的
//! `.map_err(|e| e.to_string())`、`expect()` 等不一致模式。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `ImageError`、`std::io::Error`、`serde_json::Error` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，便于 JSON 输出。

use serde::Serialize;

use crate::image_source::ImageError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 图片来源解析错误（规范化 / 解码 / 加载）
    #[error("{0}")]
    Image(#[from] ImageError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 输出序列化失败
    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 命令行参数或配置组合无效
    #[error("配置错误: {0}")]
    Config(String),
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_errors_convert_and_keep_message() {
        let err: AppError = ImageError::InvalidFormat("Invalid uri specified.".to_string()).into();
        assert_eq!(err.to_string(), "格式错误：Invalid uri specified.");
        assert_eq!(
            serde_json::to_string(&err).expect("serialize"),
            "\"格式错误：Invalid uri specified.\""
        );
    }

    #[test]
    fn io_errors_convert() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, AppError::Io(_)));
    }
}
