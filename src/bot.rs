//! 演示机器人：控制台与 HTTP 入口共用的组装逻辑
//!
//! - 会话作用域：菜单显示状态、机器人版本
//! - 用户作用域：计数器、主题
//! - 默认菜单 main：count / reset / theme（子菜单 light / dark）
//! - 上下文菜单 confirm-reset：点击后自动隐藏
//! - 新成员加入会话时发送欢迎语；识别不到的输入交给兜底回复

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::core::Result;
use crate::extensions::{CheckVersion, FilterActivity, ResetScope, ShowTyping, TurnFilter};
use crate::framework::{activity_types, Activity, ActivitySink, BotAdapter, Next, TurnContext, TurnHandler};
use crate::memory::{Fragment, Scope, ScopeManager};
use crate::menus::{ChoiceHandler, Menu, MenuChoice, MenuContextExt, MenuManager, MenuSettings, MergeStyle};
use crate::storage::{create_storage, Storage};
use crate::template::Template;

const CONFIRM_MENU: &str = "confirm-reset";

fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// count：计数器加一并回复
struct Count {
    counter: Fragment,
    reply: Template,
}

#[async_trait]
impl ChoiceHandler for Count {
    async fn on_choice(&self, ctx: &TurnContext, _data: Option<Value>, _next: Next<'_>) -> Result<()> {
        let count = self.counter.get_as::<i64>(ctx).await?.unwrap_or(0) + 1;
        self.counter.set(ctx, json!(count)).await?;
        ctx.send_text(text_of(self.reply.render(&json!({ "count": count }))))
            .await
    }
}

/// reset：显示确认菜单
struct AskReset;

#[async_trait]
impl ChoiceHandler for AskReset {
    async fn on_choice(&self, ctx: &TurnContext, _data: Option<Value>, _next: Next<'_>) -> Result<()> {
        ctx.menus()
            .await?
            .show_menu(ctx, CONFIRM_MENU, Some(json!({ "fragment": "counter" })))
            .await?;
        ctx.send_text("Reset your counter?").await
    }
}

struct ConfirmReset {
    counter: Fragment,
    confirmed: bool,
}

#[async_trait]
impl ChoiceHandler for ConfirmReset {
    async fn on_choice(&self, ctx: &TurnContext, _data: Option<Value>, _next: Next<'_>) -> Result<()> {
        if self.confirmed {
            self.counter.forget(ctx).await?;
            ctx.send_text("Counter reset.").await
        } else {
            ctx.send_text("Okay, keeping it.").await
        }
    }
}

struct SetTheme {
    theme: Fragment,
    value: &'static str,
}

#[async_trait]
impl ChoiceHandler for SetTheme {
    async fn on_choice(&self, ctx: &TurnContext, _data: Option<Value>, _next: Next<'_>) -> Result<()> {
        self.theme.set_as(ctx, self.value).await?;
        ctx.send_text(format!("Theme set to {}.", self.value)).await
    }
}

struct Welcome;

#[async_trait]
impl TurnFilter for Welcome {
    async fn filter(&self, ctx: &TurnContext, _next: Next<'_>) -> Result<()> {
        ctx.send_text("Hi! Tap 'count' to start counting.").await
    }
}

/// 兜底回复
struct Fallback {
    reply: Template,
}

#[async_trait]
impl TurnHandler for Fallback {
    async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
        if !ctx.activity().is_message() {
            return Ok(());
        }
        let data = json!({ "text": ctx.activity().trimmed_text() });
        ctx.send_text(text_of(self.reply.render(&data))).await
    }
}

/// 组装好的机器人
pub struct Bot {
    adapter: BotAdapter,
    fallback: Fallback,
    storage: Arc<dyn Storage>,
}

impl Bot {
    /// 按配置创建存储后组装
    pub fn build(config: &AppConfig) -> Result<Self> {
        Self::with_storage(config, create_storage(&config.storage))
    }

    pub fn with_storage(config: &AppConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let mut conversation = Scope::conversation(storage.clone());
        MenuManager::register_state(&mut conversation)?;
        conversation.fragment("version", None)?;
        let conversation = Arc::new(conversation);

        let mut user = Scope::user(storage.clone());
        user.fragment("counter", Some(json!(0)))?;
        user.fragment("theme", Some(json!("light")))?;
        let user = Arc::new(user);

        let counter = Fragment::new(user.clone(), "counter")?;
        let theme = Fragment::new(user.clone(), "theme")?;

        let mut theme_menu = Menu::new("theme", MenuSettings::default())?;
        for value in ["light", "dark"] {
            theme_menu.add_choice(
                MenuChoice::new(value).with_category("Appearance"),
                SetTheme {
                    theme: theme.clone(),
                    value,
                },
            )?;
        }

        let mut main = Menu::new(
            "main",
            MenuSettings {
                is_default_menu: true,
                merge_style: MergeStyle::Right,
                min_recognize_score: config.menus.min_recognize_score,
                ..Default::default()
            },
        )?;
        main.add_choice(
            MenuChoice::new("count").with_synonyms(["add", "plus one"]),
            Count {
                counter: counter.clone(),
                reply: Template::compile(&json!("You've counted ${count} time(s)."))?,
            },
        )?
        .add_choice(MenuChoice::new("reset"), AskReset)?
        .add_submenu(MenuChoice::new("theme").with_title("Theme"), theme_menu)?;

        let mut confirm = Menu::new(
            CONFIRM_MENU,
            MenuSettings {
                merge_style: MergeStyle::Left,
                hide_after_click: true,
                hide_after_turns: Some(3),
                ..Default::default()
            },
        )?;
        confirm
            .add_choice(
                MenuChoice::new("yes"),
                ConfirmReset {
                    counter: counter.clone(),
                    confirmed: true,
                },
            )?
            .add_choice(
                MenuChoice::new("no"),
                ConfirmReset {
                    counter,
                    confirmed: false,
                },
            )?;

        let menus = MenuManager::new(conversation.clone(), vec![main, confirm])?;
        let version = Fragment::new(conversation.clone(), "version")?;

        let adapter = BotAdapter::new()
            .use_middleware(ShowTyping::from_config(&config.typing))
            .use_middleware(ScopeManager::new(vec![conversation.clone(), user])?)
            .use_middleware(CheckVersion::new(
                version,
                env!("CARGO_PKG_VERSION"),
                ResetScope::new(conversation),
            ))
            .use_middleware(menus)
            .use_middleware(FilterActivity::new(activity_types::CONVERSATION_UPDATE, Welcome));

        tracing::info!(
            name = config.app.name.as_deref().unwrap_or("toybox"),
            middleware = adapter.middleware_count(),
            "Bot assembled"
        );

        Ok(Self {
            adapter,
            fallback: Fallback {
                reply: Template::compile(&json!(
                    "Sorry, I didn't get \"${text}\". Pick one of the options."
                ))?,
            },
            storage,
        })
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// 处理一个入站活动，返回本轮发出的活动
    pub async fn process(&self, activity: Activity, sink: Arc<dyn ActivitySink>) -> Result<Vec<Activity>> {
        self.adapter
            .process_activity(activity, sink, &self.fallback)
            .await
    }
}
