//! 记忆片段
//!
//! 片段是 Scope blob 中的一个具名槽位：`{ "value": <值>, "lastAccess": <毫秒时间戳> }`。
//! 可配置默认值与过期时间（forget_after），读取时惰性判定过期。

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::scope::Scope;
use crate::core::Result;
use crate::framework::TurnContext;

const VALUE_FIELD: &str = "value";
const LAST_ACCESS_FIELD: &str = "lastAccess";

/// 片段定义（启动时注册到 Scope）
#[derive(Debug, Clone)]
pub struct FragmentSpec {
    name: String,
    default_value: Option<Value>,
    /// 0 表示永不过期
    max_age_secs: u64,
}

impl FragmentSpec {
    pub(crate) fn new(name: String, default_value: Option<Value>) -> Self {
        Self {
            name,
            default_value,
            max_age_secs: 0,
        }
    }

    /// 距上次访问超过 `seconds` 秒后遗忘
    pub fn forget_after(&mut self, seconds: u64) -> &mut Self {
        self.max_age_secs = seconds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    fn is_fresh(&self, slot: &Value, now: i64) -> bool {
        if self.max_age_secs == 0 {
            return true;
        }
        let last_access = slot
            .get(LAST_ACCESS_FIELD)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        elapsed_millis(last_access, now) <= self.max_age_secs.saturating_mul(1000)
    }
}

/// 两个毫秒时间戳之差；时钟回拨时按 0 计
pub(crate) fn elapsed_millis(since: i64, now: i64) -> u64 {
    u64::try_from(now.saturating_sub(since)).unwrap_or(0)
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn make_slot(value: Value, now: i64) -> Value {
    json!({ VALUE_FIELD: value, LAST_ACCESS_FIELD: now })
}

/// 读取槽位：未过期则刷新 lastAccess 并返回值；过期则删除；缺失且有默认值时写入默认值
pub(crate) fn read_slot(blob: &mut Map<String, Value>, def: &FragmentSpec, now: i64) -> Option<Value> {
    let fresh = blob.get(def.name()).map(|slot| def.is_fresh(slot, now));
    match fresh {
        Some(true) => {
            let slot = blob.get_mut(def.name())?;
            let value = slot.get(VALUE_FIELD).cloned();
            if let Some(obj) = slot.as_object_mut() {
                obj.insert(LAST_ACCESS_FIELD.to_string(), Value::from(now));
            }
            return value;
        }
        Some(false) => {
            tracing::debug!(fragment = %def.name(), "Fragment expired");
            blob.remove(def.name());
        }
        None => {}
    }

    let default = def.default_value()?.clone();
    blob.insert(def.name().to_string(), make_slot(default.clone(), now));
    Some(default)
}

pub(crate) fn write_slot(blob: &mut Map<String, Value>, def: &FragmentSpec, value: Value, now: i64) {
    blob.insert(def.name().to_string(), make_slot(value, now));
}

/// 片段句柄：指向某个 Scope 中已注册的片段（Scope 通过 Arc 共享，句柄不拥有它）
#[derive(Clone)]
pub struct Fragment {
    scope: Arc<Scope>,
    name: String,
}

impl Fragment {
    /// 片段必须已在 scope 上注册
    pub fn new(scope: Arc<Scope>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        scope.fragment_spec(&name)?;
        Ok(Self { scope, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get(&self, ctx: &TurnContext) -> Result<Option<Value>> {
        self.scope.get(ctx, &self.name).await
    }

    /// 读取并反序列化；值缺失返回 None
    pub async fn get_as<T: DeserializeOwned>(&self, ctx: &TurnContext) -> Result<Option<T>> {
        match self.get(ctx).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, ctx: &TurnContext, value: Value) -> Result<()> {
        self.scope.set(ctx, &self.name, value).await
    }

    pub async fn set_as<T: Serialize + Sync + ?Sized>(&self, ctx: &TurnContext, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(ctx, value).await
    }

    pub async fn has(&self, ctx: &TurnContext) -> Result<bool> {
        self.scope.has(ctx, &self.name).await
    }

    pub async fn forget(&self, ctx: &TurnContext) -> Result<()> {
        self.scope.forget(ctx, &self.name).await
    }
}
