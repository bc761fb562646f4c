//! 版本检查
//!
//! 机器人升级后旧会话里的状态可能已不兼容。每轮比较片段里记录的版本与当前版本，
//! 不一致时交给 `VersionChangedHandler` 处理（通常是清空状态），之后写入当前版本。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::Result;
use crate::framework::{Middleware, Next, TurnContext};
use crate::memory::{Fragment, Scope};

/// 版本变化处理器：由处理器决定是否继续管线
#[async_trait]
pub trait VersionChangedHandler: Send + Sync {
    async fn on_version_changed(&self, ctx: &TurnContext, stored: Value, next: Next<'_>) -> Result<()>;
}

/// 遗忘作用域内的全部片段，可选地发送一条提示，然后继续管线
pub struct ResetScope {
    scope: Arc<Scope>,
    notice: Option<String>,
}

impl ResetScope {
    pub fn new(scope: Arc<Scope>) -> Self {
        Self {
            scope,
            notice: None,
        }
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }
}

#[async_trait]
impl VersionChangedHandler for ResetScope {
    async fn on_version_changed(&self, ctx: &TurnContext, stored: Value, next: Next<'_>) -> Result<()> {
        tracing::info!(
            scope = %self.scope.namespace(),
            stored = %stored,
            "Bot version changed, resetting scope"
        );
        for name in self.scope.fragment_names() {
            self.scope.forget(ctx, &name).await?;
        }
        if let Some(notice) = &self.notice {
            ctx.send_text(notice.clone()).await?;
        }
        next.run(ctx).await
    }
}

pub struct CheckVersion {
    fragment: Fragment,
    version: Value,
    handler: Arc<dyn VersionChangedHandler>,
}

impl CheckVersion {
    pub fn new(
        fragment: Fragment,
        version: impl Into<Value>,
        handler: impl VersionChangedHandler + 'static,
    ) -> Self {
        Self {
            fragment,
            version: version.into(),
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl Middleware for CheckVersion {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
        match self.fragment.get(ctx).await? {
            Some(stored) if stored != self.version => {
                self.handler.on_version_changed(ctx, stored, next).await?;
                self.fragment.set(ctx, self.version.clone()).await
            }
            Some(_) => next.run(ctx).await,
            None => {
                self.fragment.set(ctx, self.version.clone()).await?;
                next.run(ctx).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{Activity, BotAdapter, CollectingSink, NoopHandler};
    use crate::memory::{ScopeContextExt, ScopeManager};
    use crate::storage::{MemoryStorage, Storage};
    use serde_json::json;

    fn message() -> Activity {
        Activity::message("hi").with_address("test", "c1", "u1", "bot")
    }

    fn adapter(storage: Arc<MemoryStorage>, version: &str) -> BotAdapter {
        let mut conversation = Scope::conversation(storage);
        conversation.fragment("version", None).unwrap();
        conversation.fragment("topic", None).unwrap();
        let conversation = Arc::new(conversation);
        let fragment = Fragment::new(conversation.clone(), "version").unwrap();
        BotAdapter::new()
            .use_middleware(ScopeManager::new(vec![conversation.clone()]).unwrap())
            .use_middleware(CheckVersion::new(
                fragment,
                version,
                ResetScope::new(conversation).with_notice("I've been updated."),
            ))
    }

    struct SetTopic;

    #[async_trait]
    impl crate::framework::TurnHandler for SetTopic {
        async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
            ctx.scope("conversation").await?.set("topic", json!("cats")).await
        }
    }

    #[tokio::test]
    async fn test_version_change_resets_scope() {
        let storage = Arc::new(MemoryStorage::new());

        let v1 = adapter(storage.clone(), "1.0");
        let sent = v1
            .process_activity(message(), Arc::new(CollectingSink::new()), &SetTopic)
            .await
            .unwrap();
        assert!(sent.is_empty());

        // 同版本不触发
        let sent = v1
            .process_activity(message(), Arc::new(CollectingSink::new()), &NoopHandler)
            .await
            .unwrap();
        assert!(sent.is_empty());

        let v2 = adapter(storage.clone(), "2.0");
        let sent = v2
            .process_activity(message(), Arc::new(CollectingSink::new()), &NoopHandler)
            .await
            .unwrap();
        assert_eq!(sent[0].text.as_deref(), Some("I've been updated."));

        let stored = storage
            .read(&["conversation/bot/test/c1".to_string()])
            .await
            .unwrap();
        let blob = &stored["conversation/bot/test/c1"].value;
        assert_eq!(blob["version"]["value"], "2.0");
        assert!(blob.get("topic").is_none());
    }
}
