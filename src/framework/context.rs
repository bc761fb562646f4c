//! 轮次上下文
//!
//! 一个 `TurnContext` 对应一次入站活动的完整处理过程：持有入站活动、本轮临时状态（TurnState）、
//! 发送钩子与出站通道。所有方法只需 `&self`，内部用 tokio 锁，便于同一轮内并发预加载 / 保存。

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::activity::Activity;
use crate::core::Result;

/// 出站活动的去处（控制台、HTTP 响应缓冲等）
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn deliver(&self, activities: &[Activity]) -> Result<()>;
}

/// 发送钩子：在活动真正投递前修改（或清空）本批次
#[async_trait]
pub trait SendHook: Send + Sync {
    async fn on_send(&self, ctx: &TurnContext, activities: &mut Vec<Activity>) -> Result<()>;
}

/// 内存收集器：把投递的活动按顺序缓存起来
#[derive(Default)]
pub struct CollectingSink {
    delivered: RwLock<Vec<Activity>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn delivered(&self) -> Vec<Activity> {
        self.delivered.read().await.clone()
    }

    /// 取出并清空已收集的活动
    pub async fn take(&self) -> Vec<Activity> {
        std::mem::take(&mut *self.delivered.write().await)
    }
}

#[async_trait]
impl ActivitySink for CollectingSink {
    async fn deliver(&self, activities: &[Activity]) -> Result<()> {
        self.delivered.write().await.extend_from_slice(activities);
        Ok(())
    }
}

/// 本轮临时状态：按键存放任意类型的值，轮次结束即丢弃
#[derive(Default)]
pub struct TurnState {
    values: RwLock<HashMap<String, Box<dyn Any + Send + Sync>>>,
}

impl TurnState {
    pub async fn insert<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.values.write().await.insert(key.into(), Box::new(value));
    }

    /// 键不存在时才写入；返回是否写入
    pub async fn insert_if_absent<T: Send + Sync + 'static>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> bool {
        let mut values = self.values.write().await;
        let key = key.into();
        if values.contains_key(&key) {
            return false;
        }
        values.insert(key, Box::new(value));
        true
    }

    pub async fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.values
            .read()
            .await
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// 以可变引用访问某个值（类型不匹配或不存在时返回 None）
    pub async fn with_mut<T, R, F>(&self, key: &str, f: F) -> Option<R>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&mut T) -> R,
    {
        let mut values = self.values.write().await;
        values
            .get_mut(key)
            .and_then(|v| v.downcast_mut::<T>())
            .map(f)
    }
}

/// 轮次上下文
pub struct TurnContext {
    activity: Activity,
    state: TurnState,
    send_hooks: RwLock<Vec<Arc<dyn SendHook>>>,
    sink: Arc<dyn ActivitySink>,
    responses: RwLock<Vec<Activity>>,
}

impl TurnContext {
    pub fn new(activity: Activity, sink: Arc<dyn ActivitySink>) -> Self {
        Self {
            activity,
            state: TurnState::default(),
            send_hooks: RwLock::new(Vec::new()),
            sink,
            responses: RwLock::new(Vec::new()),
        }
    }

    /// 入站活动
    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    /// 出站通道（后台任务如输入中提示可克隆后直接投递，不经过发送钩子）
    pub fn sink(&self) -> Arc<dyn ActivitySink> {
        self.sink.clone()
    }

    /// 注册发送钩子，按注册顺序执行
    pub async fn on_send_activities(&self, hook: Arc<dyn SendHook>) {
        self.send_hooks.write().await.push(hook);
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_activity(Activity::message(text)).await
    }

    pub async fn send_activity(&self, activity: Activity) -> Result<()> {
        self.send_activities(vec![activity]).await
    }

    /// 补全会话地址 → 依次执行发送钩子 → 投递并记录
    pub async fn send_activities(&self, mut activities: Vec<Activity>) -> Result<()> {
        for activity in activities.iter_mut() {
            activity.apply_reference(&self.activity);
        }

        let hooks = self.send_hooks.read().await.clone();
        for hook in hooks {
            hook.on_send(self, &mut activities).await?;
        }

        if activities.is_empty() {
            return Ok(());
        }

        self.sink.deliver(&activities).await?;
        self.responses.write().await.extend(activities);
        Ok(())
    }

    /// 本轮已发送的活动
    pub async fn responses(&self) -> Vec<Activity> {
        self.responses.read().await.clone()
    }

    pub async fn responded(&self) -> bool {
        !self.responses.read().await.is_empty()
    }
}
