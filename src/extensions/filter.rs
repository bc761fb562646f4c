//! 按活动类型过滤：只对指定类型的入站活动运行过滤器，由过滤器决定是否继续管线

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::Result;
use crate::framework::{Middleware, Next, TurnContext};

#[async_trait]
pub trait TurnFilter: Send + Sync {
    async fn filter(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()>;
}

pub struct FilterActivity {
    activity_type: String,
    filter: Arc<dyn TurnFilter>,
}

impl FilterActivity {
    pub fn new(activity_type: impl Into<String>, filter: impl TurnFilter + 'static) -> Self {
        Self {
            activity_type: activity_type.into(),
            filter: Arc::new(filter),
        }
    }
}

#[async_trait]
impl Middleware for FilterActivity {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
        if ctx.activity().activity_type == self.activity_type {
            self.filter.filter(ctx, next).await
        } else {
            next.run(ctx).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{activity_types, Activity, BotAdapter, CollectingSink, TurnHandler};

    /// 欢迎新成员，不进入机器人逻辑
    struct Welcome;

    #[async_trait]
    impl TurnFilter for Welcome {
        async fn filter(&self, ctx: &TurnContext, _next: Next<'_>) -> Result<()> {
            ctx.send_text("welcome").await
        }
    }

    struct Echo;

    #[async_trait]
    impl TurnHandler for Echo {
        async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
            let text = ctx.activity().trimmed_text().to_string();
            ctx.send_text(text).await
        }
    }

    #[tokio::test]
    async fn test_filter_only_matching_type() {
        let adapter =
            BotAdapter::new().use_middleware(FilterActivity::new(activity_types::CONVERSATION_UPDATE, Welcome));

        let update = Activity::new(activity_types::CONVERSATION_UPDATE).with_address("test", "c1", "u1", "bot");
        let sent = adapter
            .process_activity(update, Arc::new(CollectingSink::new()), &Echo)
            .await
            .unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text.as_deref(), Some("welcome"));

        let message = Activity::message("ping").with_address("test", "c1", "u1", "bot");
        let sent = adapter
            .process_activity(message, Arc::new(CollectingSink::new()), &Echo)
            .await
            .unwrap();
        assert_eq!(sent[0].text.as_deref(), Some("ping"));
    }
}
