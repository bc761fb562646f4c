//! 适配器：持有中间件管线，为每个入站活动创建 TurnContext 并跑完整个管线
//!
//! 同一会话的轮次串行由调用方保证（控制台逐行处理；HTTP 服务用并发上限）。

use std::sync::Arc;

use super::activity::Activity;
use super::context::{ActivitySink, TurnContext};
use super::middleware::{Middleware, Next, TurnHandler};
use crate::core::Result;

#[derive(Default, Clone)]
pub struct BotAdapter {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl BotAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加中间件（按追加顺序执行）
    pub fn use_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn use_shared(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    /// 处理一个入站活动，返回本轮发出的全部活动
    pub async fn process_activity(
        &self,
        activity: Activity,
        sink: Arc<dyn ActivitySink>,
        handler: &dyn TurnHandler,
    ) -> Result<Vec<Activity>> {
        tracing::debug!(
            activity_type = %activity.activity_type,
            conversation = ?activity.conversation_id(),
            "Processing activity"
        );
        let ctx = TurnContext::new(activity, sink);
        Next::new(&self.middleware, handler).run(&ctx).await?;
        Ok(ctx.responses().await)
    }
}
