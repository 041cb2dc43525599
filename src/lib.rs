//! # 图片来源解析 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 宿主 (显示层 / CLI)                       │
//! │                                                          │
//! │  set_source ── set_in_viewport ── set_lazy_loading       │
//! │       ↕                    ↑ attach / state / event       │
//! └───────┼────────────────────┼─────────────────────────────┘
//!         ↕                    │
//! ┌───────┼────────────────────┼─────────────────────────────┐
//! │       ↕        image_source (Rust)                        │
//! │                                                          │
//! │  ┌─ component ── 会话编排 + 取消 + 懒加载                  │
//! │  │                                                       │
//! │  ├─ normalizer ─ 句柄 / 内嵌数据 / 引用                    │
//! │  │   ├─ decoder     Base64 · 十六进制 · data: (两阶段)     │
//! │  │   └─ sniffer     SVG 嗅探                              │
//! │  │                                                       │
//! │  ├─ loader ───── HTTP(S) / file / 应用根目录 (可取消)       │
//! │  └─ state ────── Unloaded · Loading · Loaded · Failed     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 二进制层统一错误类型 `AppError` |
//! | [`image_source`] | 来源规范化、内嵌数据解码、会话取消与生命周期状态机 |

pub mod error;
pub mod image_source;
