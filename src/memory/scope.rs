//! 记忆作用域
//!
//! 一个 Scope 对应一个持久化边界（会话、用户、会话成员……），每个身份映射到一个存储键，
//! 键下保存一整个 JSON 对象（blob）。blob 在一轮内只从存储读取一次，缓存于 TurnState；
//! 轮末与读取时的快照比较，有变化才写回。
//!
//! 写回时 ETag 固定为通配 `*`，即后写覆盖先写，本层不做并发冲突检测。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::fragment::{self, FragmentSpec};
use crate::core::{Result, ToyboxError};
use crate::framework::{Activity, TurnContext};
use crate::storage::{Storage, StoreItem, WILDCARD_ETAG};

/// 自定义存储键函数：(namespace, 入站活动) -> 存储键
pub type KeyFn = Arc<dyn Fn(&str, &Activity) -> Result<String> + Send + Sync>;

/// 存储键生成策略，键格式 `<namespace>/<botId>/<channelId>/<id>[/<memberId>]`
#[derive(Clone)]
pub enum KeyStrategy {
    /// 按会话：`<ns>/<bot>/<channel>/<conversation>`
    Conversation,
    /// 按用户：`<ns>/<bot>/<channel>/<user>`
    User,
    /// 按会话中的成员：`<ns>/<bot>/<channel>/<conversation>/<user>`
    ConversationMember,
    Custom(KeyFn),
}

impl KeyStrategy {
    pub fn storage_key(&self, namespace: &str, activity: &Activity) -> Result<String> {
        let prefix = || -> Result<String> {
            let bot = activity
                .bot_id()
                .ok_or(ToyboxError::MissingIdentity("recipient.id"))?;
            let channel = activity
                .channel_id()
                .ok_or(ToyboxError::MissingIdentity("channelId"))?;
            Ok(format!("{}/{}/{}", namespace, bot, channel))
        };
        let conversation = || {
            activity
                .conversation_id()
                .ok_or(ToyboxError::MissingIdentity("conversation.id"))
        };
        let user = || activity.user_id().ok_or(ToyboxError::MissingIdentity("from.id"));

        match self {
            KeyStrategy::Conversation => Ok(format!("{}/{}", prefix()?, conversation()?)),
            KeyStrategy::User => Ok(format!("{}/{}", prefix()?, user()?)),
            KeyStrategy::ConversationMember => {
                Ok(format!("{}/{}/{}", prefix()?, conversation()?, user()?))
            }
            KeyStrategy::Custom(f) => f(namespace, activity),
        }
    }
}

/// 本轮缓存条目（每个 Scope 每轮至多一个）
#[derive(Debug, Clone)]
struct CacheEntry {
    key: String,
    blob: Map<String, Value>,
    /// 读取时的规范化序列化快照
    original_hash: String,
    /// 本轮是否被真正访问过（预加载不算）
    accessed: bool,
}

/// 规范化快照：`serde_json::Map` 底层是 BTreeMap，序列化时键有序
fn snapshot(blob: &Map<String, Value>) -> Result<String> {
    Ok(serde_json::to_string(blob)?)
}

/// 记忆作用域
pub struct Scope {
    storage: Arc<dyn Storage>,
    namespace: String,
    keys: KeyStrategy,
    fragments: HashMap<String, FragmentSpec>,
}

impl Scope {
    pub fn new(namespace: impl Into<String>, storage: Arc<dyn Storage>, keys: KeyStrategy) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
            keys,
            fragments: HashMap::new(),
        }
    }

    /// 会话作用域（namespace = "conversation"）
    pub fn conversation(storage: Arc<dyn Storage>) -> Self {
        Self::new("conversation", storage, KeyStrategy::Conversation)
    }

    /// 用户作用域（namespace = "user"）
    pub fn user(storage: Arc<dyn Storage>) -> Self {
        Self::new("user", storage, KeyStrategy::User)
    }

    /// 会话成员作用域（namespace = "conversationMember"）
    pub fn conversation_member(storage: Arc<dyn Storage>) -> Self {
        Self::new("conversationMember", storage, KeyStrategy::ConversationMember)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 注册片段（启动时调用）；同名重复注册返回错误
    pub fn fragment(
        &mut self,
        name: impl Into<String>,
        default_value: Option<Value>,
    ) -> Result<&mut FragmentSpec> {
        let name = name.into();
        if self.fragments.contains_key(&name) {
            return Err(ToyboxError::DuplicateFragment {
                scope: self.namespace.clone(),
                fragment: name,
            });
        }
        Ok(self
            .fragments
            .entry(name.clone())
            .or_insert_with(|| FragmentSpec::new(name, default_value)))
    }

    pub fn fragment_spec(&self, name: &str) -> Result<&FragmentSpec> {
        self.fragments
            .get(name)
            .ok_or_else(|| ToyboxError::UnknownFragment {
                scope: self.namespace.clone(),
                fragment: name.to_string(),
            })
    }

    pub fn fragment_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fragments.keys().cloned().collect();
        names.sort();
        names
    }

    /// 本轮的存储键
    pub fn storage_key(&self, activity: &Activity) -> Result<String> {
        self.keys.storage_key(&self.namespace, activity)
    }

    fn cache_key(&self) -> String {
        format!("toybox.scope.{}", self.namespace)
    }

    /// 确保本轮缓存已就绪
    ///
    /// 首次调用读取存储（不存在时为空对象）并记录快照；之后直接命中缓存。
    /// `accessed = false` 用于预加载，不计入访问统计。
    pub async fn load(&self, ctx: &TurnContext, accessed: bool) -> Result<()> {
        let cache_key = self.cache_key();
        let hit = ctx
            .state()
            .with_mut::<CacheEntry, _, _>(&cache_key, |entry| {
                if accessed {
                    entry.accessed = true;
                }
            })
            .await
            .is_some();
        if hit {
            return Ok(());
        }

        let key = self.storage_key(ctx.activity())?;
        let mut items = self.storage.read(std::slice::from_ref(&key)).await?;
        let blob = items.remove(&key).map(|item| item.value).unwrap_or_default();
        let original_hash = snapshot(&blob)?;
        tracing::debug!(scope = %self.namespace, key = %key, accessed, "Scope loaded");

        let entry = CacheEntry {
            key,
            blob,
            original_hash,
            accessed,
        };
        if !ctx.state().insert_if_absent(cache_key.clone(), entry).await && accessed {
            // 并发加载时另一方先写入了缓存，以先写入者为准
            ctx.state()
                .with_mut::<CacheEntry, _, _>(&cache_key, |entry| entry.accessed = true)
                .await;
        }
        Ok(())
    }

    /// 加载后以可变引用访问本轮缓存的 blob，修改对本轮后续访问立即可见
    pub async fn with_blob<R, F>(&self, ctx: &TurnContext, accessed: bool, f: F) -> Result<R>
    where
        F: FnOnce(&mut Map<String, Value>) -> R + Send,
    {
        self.load(ctx, accessed).await?;
        ctx.state()
            .with_mut::<CacheEntry, _, _>(&self.cache_key(), |entry| f(&mut entry.blob))
            .await
            .ok_or(ToyboxError::ServiceUnavailable("scope cache"))
    }

    /// 本轮缓存的 blob 副本（未加载时为 None）
    pub async fn cached(&self, ctx: &TurnContext) -> Option<Map<String, Value>> {
        ctx.state()
            .with_mut::<CacheEntry, _, _>(&self.cache_key(), |entry| entry.blob.clone())
            .await
    }

    /// 写回：本轮未加载则无操作；blob 与快照一致则跳过写入
    ///
    /// 存储错误原样返回，不重试。
    pub async fn save(&self, ctx: &TurnContext) -> Result<()> {
        let cache_key = self.cache_key();
        let pending = ctx
            .state()
            .with_mut::<CacheEntry, _, _>(&cache_key, |entry| -> Result<Option<_>> {
                let hash = snapshot(&entry.blob)?;
                if hash == entry.original_hash {
                    Ok(None)
                } else {
                    Ok(Some((entry.key.clone(), entry.blob.clone(), hash)))
                }
            })
            .await;

        let Some(pending) = pending else {
            return Ok(());
        };
        let Some((key, blob, hash)) = pending? else {
            tracing::debug!(scope = %self.namespace, "Scope unchanged, skipping write");
            return Ok(());
        };

        let item = StoreItem::new(blob).with_etag(WILDCARD_ETAG);
        self.storage
            .write(HashMap::from([(key.clone(), item)]))
            .await?;
        tracing::debug!(scope = %self.namespace, key = %key, "Scope saved");

        ctx.state()
            .with_mut::<CacheEntry, _, _>(&cache_key, |entry| entry.original_hash = hash)
            .await;
        Ok(())
    }

    /// 本轮是否被真正访问过
    pub async fn was_accessed(&self, ctx: &TurnContext) -> bool {
        ctx.state()
            .with_mut::<CacheEntry, _, _>(&self.cache_key(), |entry| entry.accessed)
            .await
            .unwrap_or(false)
    }

    /// 读取片段值（过期则删除并回落到默认值）
    pub async fn get(&self, ctx: &TurnContext, name: &str) -> Result<Option<Value>> {
        let def = self.fragment_spec(name)?;
        let now = fragment::now_millis();
        self.with_blob(ctx, true, |blob| fragment::read_slot(blob, def, now))
            .await
    }

    pub async fn set(&self, ctx: &TurnContext, name: &str, value: Value) -> Result<()> {
        let def = self.fragment_spec(name)?;
        let now = fragment::now_millis();
        self.with_blob(ctx, true, |blob| fragment::write_slot(blob, def, value, now))
            .await
    }

    /// 是否有值；配置了默认值时恒为 true（读取会写入默认值）
    pub async fn has(&self, ctx: &TurnContext, name: &str) -> Result<bool> {
        Ok(self.get(ctx, name).await?.is_some())
    }

    /// 删除片段，下次读取回落到默认值
    pub async fn forget(&self, ctx: &TurnContext, name: &str) -> Result<()> {
        let def = self.fragment_spec(name)?;
        self.with_blob(ctx, true, |blob| {
            blob.remove(def.name());
        })
        .await
    }
}
