//! 文件存储
//!
//! 每个键一个 JSON 文件；键中 `[A-Za-z0-9_-]` 以外的字符转义为 `%XX`，目录不存在时自动创建。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Storage, StoreItem};
use crate::core::StorageError;

#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    /// 串行化写入，保证 ETag 检查与落盘之间不被打断
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len());
        for b in key.bytes() {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
                name.push(b as char);
            } else {
                name.push_str(&format!("%{:02X}", b));
            }
        }
        self.root.join(format!("{}.json", name))
    }

    async fn read_item(&self, key: &str) -> Result<Option<StoreItem>, StorageError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn read(&self, keys: &[String]) -> Result<HashMap<String, StoreItem>, StorageError> {
        let mut items = HashMap::new();
        for key in keys {
            if let Some(item) = self.read_item(key).await? {
                items.insert(key.clone(), item);
            }
        }
        Ok(items)
    }

    async fn write(&self, changes: HashMap<String, StoreItem>) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.root).await?;

        for (key, change) in &changes {
            if change.requires_match() {
                let stored = self.read_item(key).await?.and_then(|i| i.e_tag);
                if stored.as_deref() != change.e_tag.as_deref() {
                    return Err(StorageError::Conflict(key.clone()));
                }
            }
        }

        for (key, mut change) in changes {
            change.e_tag = Some(uuid::Uuid::new_v4().to_string());
            let data = serde_json::to_string_pretty(&change)?;
            tokio::fs::write(self.path_for(&key), data).await?;
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        for key in keys {
            match tokio::fs::remove_file(self.path_for(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("state"));
        let key = "conversation/bot/test/c1".to_string();

        assert!(storage.read(&[key.clone()]).await.unwrap().is_empty());

        let value = json!({"counter": {"value": 1}}).as_object().cloned().unwrap();
        storage
            .write(HashMap::from([(key.clone(), StoreItem::new(value))]))
            .await
            .unwrap();

        let read = storage.read(&[key.clone()]).await.unwrap();
        assert_eq!(read[&key].value["counter"]["value"], 1);

        let stale = StoreItem::default().with_etag("nope");
        let err = storage.write(HashMap::from([(key.clone(), stale)])).await;
        assert!(matches!(err, Err(StorageError::Conflict(_))));

        storage.delete(&[key.clone()]).await.unwrap();
        assert!(storage.read(&[key]).await.unwrap().is_empty());
    }

    #[test]
    fn test_key_escaping() {
        let storage = FileStorage::new("/tmp/x");
        let path = storage.path_for("user/bot/a b");
        assert_eq!(path.file_name().unwrap(), "user%2Fbot%2Fa%20b.json");
    }
}
