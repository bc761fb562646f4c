//! 中间件管线
//!
//! 每个中间件拿到 `Next`（管线剩余部分），自行决定是否调用 `next.run(ctx)` 继续；
//! 管线末端是机器人自身逻辑 `TurnHandler`。

use std::sync::Arc;

use async_trait::async_trait;

use super::context::TurnContext;
use crate::core::Result;

/// 中间件 trait
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()>;
}

/// 机器人逻辑（管线末端）
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn on_turn(&self, ctx: &TurnContext) -> Result<()>;
}

/// 什么都不做的末端处理器
#[derive(Debug, Default)]
pub struct NoopHandler;

#[async_trait]
impl TurnHandler for NoopHandler {
    async fn on_turn(&self, _ctx: &TurnContext) -> Result<()> {
        Ok(())
    }
}

/// 管线剩余部分
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    handler: &'a dyn TurnHandler,
}

impl<'a> Next<'a> {
    pub fn new(middleware: &'a [Arc<dyn Middleware>], handler: &'a dyn TurnHandler) -> Self {
        Self {
            middleware,
            handler,
        }
    }

    /// 运行剩余管线
    pub async fn run(self, ctx: &TurnContext) -> Result<()> {
        match self.middleware.split_first() {
            Some((first, rest)) => {
                first
                    .on_turn(
                        ctx,
                        Next {
                            middleware: rest,
                            handler: self.handler,
                        },
                    )
                    .await
            }
            None => self.handler.on_turn(ctx).await,
        }
    }
}
