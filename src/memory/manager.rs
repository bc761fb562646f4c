//! 作用域管理中间件
//!
//! 每轮流程：注册访问器 → 按历史访问模式预加载 → 运行剩余管线 → 写回被访问过的作用域并更新访问模式。
//!
//! 访问模式按活动类型分组，记录"本轮访问了哪些作用域"的组合及出现次数；
//! 预加载选加权次数最高的组合：`count * (0.7 + 0.3 * 组合大小 / 作用域总数)`。
//! 预加载只是延迟优化，统计只增不减，进程重启即丢失。
//!
//! 任一作用域写回失败时整轮失败（并发写回中先失败者的错误被返回）。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use tokio::sync::RwLock;

use super::accessor::{ScopeRegistry, SCOPES_KEY};
use super::scope::Scope;
use crate::core::{Result, ToyboxError};
use crate::framework::{Middleware, Next, TurnContext};

const SIGNATURE_SEPARATOR: &str = ",";

/// 一种作用域组合及其出现次数
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPattern {
    /// 组合中的作用域（ScopeManager 注册顺序下标）
    pub scopes: Vec<usize>,
    pub count: u64,
}

impl AccessPattern {
    /// 加权次数：组合越完整权重越高，但仍以实际次数为主
    pub fn weighted_count(&self, total_scopes: usize) -> f64 {
        if total_scopes == 0 {
            return 0.0;
        }
        let coverage = self.scopes.len() as f64 / total_scopes as f64;
        self.count as f64 * (0.7 + 0.3 * coverage)
    }
}

/// 访问模式统计：活动类型 -> 组合签名 -> 模式
#[derive(Debug, Default)]
pub struct AccessPatterns {
    by_type: HashMap<String, BTreeMap<String, AccessPattern>>,
}

impl AccessPatterns {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次访问组合
    pub fn record(&mut self, activity_type: &str, signature: String, scopes: Vec<usize>) {
        self.by_type
            .entry(activity_type.to_string())
            .or_default()
            .entry(signature)
            .or_insert_with(|| AccessPattern { scopes, count: 0 })
            .count += 1;
    }

    /// 选出加权次数最高的组合；同分时保留签名字典序靠前者
    pub fn select_preload(&self, activity_type: &str, total_scopes: usize) -> Option<&AccessPattern> {
        let mut best: Option<(&AccessPattern, f64)> = None;
        for pattern in self.by_type.get(activity_type)?.values() {
            let weighted = pattern.weighted_count(total_scopes);
            match best {
                Some((_, w)) if w >= weighted => {}
                _ => best = Some((pattern, weighted)),
            }
        }
        best.map(|(p, _)| p)
    }

    pub fn get(&self, activity_type: &str, signature: &str) -> Option<&AccessPattern> {
        self.by_type.get(activity_type)?.get(signature)
    }
}

/// 作用域管理中间件
pub struct ScopeManager {
    scopes: Vec<Arc<Scope>>,
    registry: ScopeRegistry,
    patterns: RwLock<AccessPatterns>,
}

impl ScopeManager {
    /// namespace 必须唯一、非空，且不含签名分隔符
    pub fn new(scopes: Vec<Arc<Scope>>) -> Result<Self> {
        for (i, scope) in scopes.iter().enumerate() {
            let namespace = scope.namespace();
            if namespace.is_empty() || namespace.contains(SIGNATURE_SEPARATOR) {
                return Err(ToyboxError::InvalidScopeNamespace(namespace.to_string()));
            }
            if scopes[..i].iter().any(|s| s.namespace() == scope.namespace()) {
                return Err(ToyboxError::DuplicateScope(scope.namespace().to_string()));
            }
        }
        let registry = ScopeRegistry::new(&scopes);
        Ok(Self {
            scopes,
            registry,
            patterns: RwLock::new(AccessPatterns::new()),
        })
    }

    pub fn scopes(&self) -> &[Arc<Scope>] {
        &self.scopes
    }

    /// 组合签名：按注册顺序拼接 namespace
    fn signature(&self, scopes: &[usize]) -> String {
        scopes
            .iter()
            .map(|&i| self.scopes[i].namespace())
            .collect::<Vec<_>>()
            .join(SIGNATURE_SEPARATOR)
    }

    /// 读取某活动类型下某组合的统计（签名为逗号拼接的 namespace）
    pub async fn pattern(&self, activity_type: &str, signature: &str) -> Option<AccessPattern> {
        self.patterns.read().await.get(activity_type, signature).cloned()
    }

    /// 直接记录一次访问组合（按 namespace 指定）
    #[cfg(test)]
    pub(crate) async fn record_access(&self, activity_type: &str, namespaces: &[&str]) -> Result<()> {
        let mut indices = Vec::with_capacity(namespaces.len());
        for (i, scope) in self.scopes.iter().enumerate() {
            if namespaces.contains(&scope.namespace()) {
                indices.push(i);
            }
        }
        if let Some(unknown) = namespaces
            .iter()
            .find(|ns| !self.scopes.iter().any(|s| s.namespace() == **ns))
        {
            return Err(ToyboxError::UnknownScope(unknown.to_string()));
        }
        let signature = self.signature(&indices);
        self.patterns
            .write()
            .await
            .record(activity_type, signature, indices);
        Ok(())
    }

    /// 本轮应预加载的作用域
    pub async fn preload_candidates(&self, activity_type: &str) -> Vec<Arc<Scope>> {
        let patterns = self.patterns.read().await;
        patterns
            .select_preload(activity_type, self.scopes.len())
            .map(|p| p.scopes.iter().map(|&i| self.scopes[i].clone()).collect())
            .unwrap_or_default()
    }

    /// 并发预加载（accessed = false，不计入统计）
    pub async fn preload(&self, ctx: &TurnContext) -> Result<()> {
        let candidates = self.preload_candidates(&ctx.activity().activity_type).await;
        if candidates.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            activity_type = %ctx.activity().activity_type,
            scopes = ?candidates.iter().map(|s| s.namespace()).collect::<Vec<_>>(),
            "Preloading scopes"
        );
        try_join_all(candidates.iter().map(|scope| scope.load(ctx, false))).await?;
        Ok(())
    }

    /// 并发写回被访问过的作用域，然后记录访问组合
    pub async fn save_touched(&self, ctx: &TurnContext) -> Result<()> {
        let mut touched = Vec::new();
        for (i, scope) in self.scopes.iter().enumerate() {
            if scope.was_accessed(ctx).await {
                touched.push(i);
            }
        }
        if touched.is_empty() {
            return Ok(());
        }

        try_join_all(touched.iter().map(|&i| self.scopes[i].save(ctx))).await?;

        let signature = self.signature(&touched);
        tracing::debug!(
            activity_type = %ctx.activity().activity_type,
            signature = %signature,
            "Recording scope access"
        );
        self.patterns
            .write()
            .await
            .record(&ctx.activity().activity_type, signature, touched);
        Ok(())
    }
}

#[async_trait]
impl Middleware for ScopeManager {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
        ctx.state().insert(SCOPES_KEY, self.registry.clone()).await;
        self.preload(ctx).await?;
        next.run(ctx).await?;
        self.save_touched(ctx).await
    }
}
