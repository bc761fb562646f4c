//! 内存存储（进程内，重启即丢失）

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Storage, StoreItem};
use crate::core::StorageError;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, StoreItem>>,
    next_etag: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 累计成功写入的条目数（测试用来断言冗余写入被跳过）
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, keys: &[String]) -> Result<HashMap<String, StoreItem>, StorageError> {
        let items = self.items.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| items.get(k).map(|item| (k.clone(), item.clone())))
            .collect())
    }

    async fn write(&self, changes: HashMap<String, StoreItem>) -> Result<(), StorageError> {
        let mut items = self.items.write().await;

        for (key, change) in &changes {
            if change.requires_match() {
                let stored = items.get(key).and_then(|i| i.e_tag.as_deref());
                if stored != change.e_tag.as_deref() {
                    return Err(StorageError::Conflict(key.clone()));
                }
            }
        }

        for (key, mut change) in changes {
            let tag = self.next_etag.fetch_add(1, Ordering::SeqCst) + 1;
            change.e_tag = Some(tag.to_string());
            items.insert(key, change);
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut items = self.items.write().await;
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }
}
