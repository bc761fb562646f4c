//! 键值存储抽象层
//!
//! 定义统一的存储接口（read / write / delete），支持内存和文件两种实现。
//! 每个条目是一个 JSON 对象加一个不透明的并发令牌（ETag）。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::StorageSection;
use crate::core::StorageError;

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// 通配 ETag：写入时跳过并发检查（后写覆盖先写）
pub const WILDCARD_ETAG: &str = "*";

/// 存储条目
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreItem {
    #[serde(default)]
    pub value: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
}

impl StoreItem {
    pub fn new(value: Map<String, Value>) -> Self {
        Self { value, e_tag: None }
    }

    pub fn with_etag(mut self, e_tag: impl Into<String>) -> Self {
        self.e_tag = Some(e_tag.into());
        self
    }

    /// 写入方是否要求并发检查
    pub fn requires_match(&self) -> bool {
        matches!(self.e_tag.as_deref(), Some(tag) if tag != WILDCARD_ETAG)
    }
}

/// 存储接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 读取若干键，不存在的键不出现在结果中
    async fn read(&self, keys: &[String]) -> Result<HashMap<String, StoreItem>, StorageError>;

    /// 写入若干键；携带具体 ETag 的条目与已存储不一致时返回 Conflict
    async fn write(&self, changes: HashMap<String, StoreItem>) -> Result<(), StorageError>;

    /// 删除若干键
    async fn delete(&self, keys: &[String]) -> Result<(), StorageError>;
}

/// 按配置创建存储
///
/// backend = "file" 且给出 path 时使用文件存储，否则使用内存存储
pub fn create_storage(section: &StorageSection) -> Arc<dyn Storage> {
    match (section.backend.as_str(), section.path.as_ref()) {
        ("file", Some(path)) => {
            tracing::info!("Using file storage: {:?}", path);
            Arc::new(FileStorage::new(path))
        }
        ("file", None) => {
            tracing::warn!("File storage requested without storage.path, using memory storage");
            Arc::new(MemoryStorage::new())
        }
        _ => {
            tracing::info!("Using in-memory storage");
            Arc::new(MemoryStorage::new())
        }
    }
}
