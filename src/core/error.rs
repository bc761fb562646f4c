//! 错误类型
//!
//! 配置错误（重复注册、非法菜单设置、未知名称）在启动或首次访问时同步抛出，由机器人作者修复；
//! 存储错误原样向上传播，本层不做重试与兜底。识别不到选项不是错误，用 `None` 表示。

use thiserror::Error;

/// 存储层错误（读写失败、并发冲突）
#[derive(Error, Debug)]
pub enum StorageError {
    /// 写入时携带的 ETag 与已存储的不一致
    #[error("ETag conflict for key: {0}")]
    Conflict(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Other(String),
}

/// 工具箱统一错误
#[derive(Error, Debug)]
pub enum ToyboxError {
    #[error("Duplicate fragment '{fragment}' in scope '{scope}'")]
    DuplicateFragment { scope: String, fragment: String },

    #[error("Unknown fragment '{fragment}' in scope '{scope}'")]
    UnknownFragment { scope: String, fragment: String },

    #[error("Duplicate scope namespace: {0}")]
    DuplicateScope(String),

    #[error("Unknown scope namespace: {0}")]
    UnknownScope(String),

    /// namespace 为空或含组合签名分隔符
    #[error("Invalid scope namespace: '{0}'")]
    InvalidScopeNamespace(String),

    #[error("Duplicate menu: {0}")]
    DuplicateMenu(String),

    #[error("Unknown menu: {0}")]
    UnknownMenu(String),

    #[error("Duplicate choice '{choice}' in menu '{menu}'")]
    DuplicateChoice { menu: String, choice: String },

    #[error("Unknown choice '{choice}' in menu '{menu}'")]
    UnknownChoice { menu: String, choice: String },

    #[error("Invalid menu settings for '{menu}': {reason}")]
    InvalidMenuSettings { menu: String, reason: String },

    /// 计算存储键时活动缺少必需的标识（channel / conversation / user / bot）
    #[error("Activity is missing identity field: {0}")]
    MissingIdentity(&'static str),

    /// 扩展（菜单管理器、作用域访问器）未在本轮注册
    #[error("Turn service not available: {0}")]
    ServiceUnavailable(&'static str),

    #[error("Template error: {0}")]
    Template(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = ToyboxError> = std::result::Result<T, E>;
