//! Toybox - 对话机器人工具箱
//!
//! 模块划分：
//! - **framework**: 宿主框架契约（活动、轮次上下文、中间件管线、适配器、选项识别）
//! - **storage**: 键值存储抽象（内存 / 文件）
//! - **memory**: 记忆作用域、片段、轮内缓存与按访问模式预加载
//! - **menus**: 默认菜单 / 上下文菜单、建议动作合并与选项路由
//! - **extensions**: 输入中提示、版本检查、活动过滤等中间件
//! - **template**: `${path}` JSON 模板
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **bot**: 演示机器人组装（控制台 / HTTP 入口共用）

pub mod bot;
pub mod config;
pub mod core;
pub mod extensions;
pub mod framework;
pub mod memory;
pub mod menus;
pub mod observability;
pub mod storage;
pub mod template;

pub use crate::core::{Result, StorageError, ToyboxError};
