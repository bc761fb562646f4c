//! 作用域访问器
//!
//! ScopeManager 每轮把作用域注册表放进 TurnState；机器人代码通过 `ctx.scope("conversation")`
//! 拿到借用本轮上下文的访问器，再按片段名读写。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::scope::Scope;
use crate::core::{Result, ToyboxError};
use crate::framework::TurnContext;

pub(crate) const SCOPES_KEY: &str = "toybox.scopes";

/// 作用域注册表：namespace -> Scope
#[derive(Clone, Default)]
pub struct ScopeRegistry {
    scopes: Arc<HashMap<String, Arc<Scope>>>,
}

impl ScopeRegistry {
    pub fn new(scopes: &[Arc<Scope>]) -> Self {
        Self {
            scopes: Arc::new(
                scopes
                    .iter()
                    .map(|s| (s.namespace().to_string(), s.clone()))
                    .collect(),
            ),
        }
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<Scope>> {
        self.scopes.get(namespace).cloned()
    }
}

/// 某个作用域在本轮的读写入口
pub struct ScopeAccessor<'a> {
    ctx: &'a TurnContext,
    scope: Arc<Scope>,
}

impl<'a> ScopeAccessor<'a> {
    pub fn namespace(&self) -> &str {
        self.scope.namespace()
    }

    pub async fn get(&self, name: &str) -> Result<Option<Value>> {
        self.scope.get(self.ctx, name).await
    }

    pub async fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.get(name).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, name: &str, value: Value) -> Result<()> {
        self.scope.set(self.ctx, name, value).await
    }

    pub async fn has(&self, name: &str) -> Result<bool> {
        self.scope.has(self.ctx, name).await
    }

    pub async fn forget(&self, name: &str) -> Result<()> {
        self.scope.forget(self.ctx, name).await
    }
}

/// 在 TurnContext 上按 namespace 取作用域访问器
#[async_trait]
pub trait ScopeContextExt {
    async fn scope<'a>(&'a self, namespace: &str) -> Result<ScopeAccessor<'a>>;
}

#[async_trait]
impl ScopeContextExt for TurnContext {
    async fn scope<'a>(&'a self, namespace: &str) -> Result<ScopeAccessor<'a>> {
        let registry = self
            .state()
            .get::<ScopeRegistry>(SCOPES_KEY)
            .await
            .ok_or(ToyboxError::ServiceUnavailable("scopes"))?;
        let scope = registry
            .get(namespace)
            .ok_or_else(|| ToyboxError::UnknownScope(namespace.to_string()))?;
        Ok(ScopeAccessor { ctx: self, scope })
    }
}
