//! 输入中提示
//!
//! 入站消息处理超过 `delay` 仍未结束时发送 typing 活动，之后每隔 `period` 重复一次，直到管线结束。
//! 后台任务通过 CancellationToken 停止；发送失败只记录日志。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::TypingSection;
use crate::core::Result;
use crate::framework::{Activity, ActivitySink, Middleware, Next, TurnContext};

pub struct ShowTyping {
    delay: Duration,
    period: Duration,
}

impl ShowTyping {
    pub fn new(delay: Duration, period: Duration) -> Self {
        Self { delay, period }
    }

    pub fn from_config(section: &TypingSection) -> Self {
        Self::new(
            Duration::from_millis(section.delay_ms),
            Duration::from_millis(section.period_ms),
        )
    }
}

impl Default for ShowTyping {
    fn default() -> Self {
        Self::from_config(&TypingSection::default())
    }
}

async fn typing_loop(
    sink: Arc<dyn ActivitySink>,
    incoming: Activity,
    delay: Duration,
    period: Duration,
    token: CancellationToken,
) {
    let mut wait = delay;
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let mut typing = Activity::typing();
        typing.apply_reference(&incoming);
        if let Err(e) = sink.deliver(&[typing]).await {
            tracing::warn!(error = %e, "Failed to send typing indicator");
        }
        wait = period;
    }
}

#[async_trait]
impl Middleware for ShowTyping {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
        if !ctx.activity().is_message() {
            return next.run(ctx).await;
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(typing_loop(
            ctx.sink(),
            ctx.activity().clone(),
            self.delay,
            self.period,
            token.clone(),
        ));

        let result = next.run(ctx).await;
        token.cancel();
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Typing indicator task failed");
        }
        result
    }
}
