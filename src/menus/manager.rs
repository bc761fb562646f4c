//! 菜单管理中间件
//!
//! - 默认菜单始终参与识别并附加到出站消息上
//! - 上下文菜单通过 `show_menu` 显示，状态（名称 / 显示时间 / 已过轮数 / 附带数据）存在会话作用域的片段里
//! - 识别优先级：上下文菜单在前，默认菜单按注册顺序在后，同分取靠前者
//! - 上下文菜单的自动隐藏规则（时间 / 轮数 / 点击）每轮都会评估，与是否命中无关

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::menu::{Menu, MenuMatch};
use crate::core::{Result, ToyboxError};
use crate::framework::{
    Activity, ChoiceRecognizer, Middleware, Next, SendHook, TokenChoiceRecognizer, TurnContext,
};
use crate::memory::{elapsed_millis, Fragment, Scope};

/// 显示状态所在的片段名
pub const SHOWN_MENU_FRAGMENT: &str = "menus.shown";

const MENUS_KEY: &str = "toybox.menus";

/// 当前显示的上下文菜单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShownMenu {
    pub name: String,
    /// 显示时间（毫秒）
    pub timestamp: i64,
    /// 显示后经过的轮数
    #[serde(default)]
    pub turns: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

struct Inner {
    menus: Vec<Arc<Menu>>,
    shown: Fragment,
    recognizer: Arc<dyn ChoiceRecognizer>,
}

/// 菜单管理器（克隆共享同一份菜单与状态句柄）
#[derive(Clone)]
pub struct MenuManager {
    inner: Arc<Inner>,
}

impl MenuManager {
    /// 在作用域上注册显示状态片段（须在 Scope 放进 Arc 之前调用）
    pub fn register_state(scope: &mut Scope) -> Result<()> {
        scope.fragment(SHOWN_MENU_FRAGMENT, None)?;
        Ok(())
    }

    /// 使用默认词元识别器；`state_scope` 上须已调用 `register_state`
    pub fn new(state_scope: Arc<Scope>, menus: Vec<Menu>) -> Result<Self> {
        Self::with_recognizer(state_scope, menus, Arc::new(TokenChoiceRecognizer::new()))
    }

    pub fn with_recognizer(
        state_scope: Arc<Scope>,
        menus: Vec<Menu>,
        recognizer: Arc<dyn ChoiceRecognizer>,
    ) -> Result<Self> {
        for (i, menu) in menus.iter().enumerate() {
            if menus[..i].iter().any(|m| m.name() == menu.name()) {
                return Err(ToyboxError::DuplicateMenu(menu.name().to_string()));
            }
        }
        let shown = Fragment::new(state_scope, SHOWN_MENU_FRAGMENT)?;
        tracing::info!(menus = menus.len(), "Menu manager initialized");
        Ok(Self {
            inner: Arc::new(Inner {
                menus: menus.into_iter().map(Arc::new).collect(),
                shown,
                recognizer,
            }),
        })
    }

    pub fn menu(&self, name: &str) -> Option<Arc<Menu>> {
        self.inner.menus.iter().find(|m| m.name() == name).cloned()
    }

    pub fn menus(&self) -> &[Arc<Menu>] {
        &self.inner.menus
    }

    fn default_menus(&self) -> impl Iterator<Item = &Arc<Menu>> {
        self.inner
            .menus
            .iter()
            .filter(|m| m.settings().is_default_menu)
    }

    /// 当前显示的上下文菜单状态
    pub async fn shown(&self, ctx: &TurnContext) -> Result<Option<ShownMenu>> {
        self.inner.shown.get_as(ctx).await
    }

    /// 当前显示的上下文菜单（状态里的菜单已不存在时视为无）
    async fn context_menu(&self, ctx: &TurnContext) -> Result<Option<(ShownMenu, Arc<Menu>)>> {
        Ok(self
            .shown(ctx)
            .await?
            .and_then(|state| self.menu(&state.name).map(|menu| (state, menu))))
    }

    /// 显示上下文菜单（替换已显示的）
    pub async fn show_menu(&self, ctx: &TurnContext, name: &str, data: Option<Value>) -> Result<()> {
        if self.menu(name).is_none() {
            return Err(ToyboxError::UnknownMenu(name.to_string()));
        }
        let state = ShownMenu {
            name: name.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            turns: 0,
            data,
        };
        tracing::debug!(menu = %name, "Showing menu");
        self.inner.shown.set_as(ctx, &state).await
    }

    pub async fn hide_menu(&self, ctx: &TurnContext) -> Result<()> {
        self.inner.shown.forget(ctx).await
    }

    /// 把上下文菜单与默认菜单依次合并到活动的建议动作上
    pub async fn append_suggested_actions(&self, ctx: &TurnContext, activity: &mut Activity) -> Result<()> {
        let context = self.context_menu(ctx).await?;
        let context_name = context.as_ref().map(|(_, menu)| menu.name().to_string());
        if let Some((_, menu)) = &context {
            menu.render_suggested_actions(activity);
        }
        for menu in self.default_menus() {
            if context_name.as_deref() != Some(menu.name()) {
                menu.render_suggested_actions(activity);
            }
        }
        Ok(())
    }

    /// 识别本轮输入并路由到命中选项的处理器；未命中则继续管线
    pub async fn recognize_utterance(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
        let mut context = self.context_menu(ctx).await?;
        if let Some((state, _)) = context.as_mut() {
            state.turns += 1;
            self.inner.shown.set_as(ctx, &*state).await?;
        }

        let mut candidates: Vec<Arc<Menu>> = Vec::new();
        if let Some((_, menu)) = &context {
            candidates.push(menu.clone());
        }
        for menu in self.default_menus() {
            if !candidates.iter().any(|c| c.name() == menu.name()) {
                candidates.push(menu.clone());
            }
        }

        let recognizer = self.inner.recognizer.as_ref();
        let mut best: Option<(usize, MenuMatch<'_>)> = None;
        for (i, menu) in candidates.iter().enumerate() {
            if let Some(found) = menu.recognize_choice(ctx, recognizer) {
                if best.as_ref().map_or(true, |(_, b)| found.score > b.score) {
                    best = Some((i, found));
                }
            }
        }
        let context_matched = context.is_some() && matches!(best, Some((0, _)));

        if let Some((state, menu)) = &context {
            let settings = menu.settings();
            let now = chrono::Utc::now().timestamp_millis();
            let expired = settings
                .hide_after
                .map_or(false, |secs| {
                    elapsed_millis(state.timestamp, now) > secs.saturating_mul(1000)
                });
            let worn_out = settings
                .hide_after_turns
                .map_or(false, |turns| state.turns >= turns);
            let clicked = settings.hide_after_click && context_matched;
            if expired || worn_out || clicked {
                tracing::debug!(menu = %menu.name(), expired, worn_out, clicked, "Hiding menu");
                self.hide_menu(ctx).await?;
            }
        }

        match best {
            Some((_, found)) => {
                let data = if context_matched {
                    context.and_then(|(state, _)| state.data)
                } else {
                    None
                };
                found.invoke(ctx, data, next).await
            }
            None => next.run(ctx).await,
        }
    }
}

#[async_trait]
impl SendHook for MenuManager {
    async fn on_send(&self, ctx: &TurnContext, activities: &mut Vec<Activity>) -> Result<()> {
        if let Some(last) = activities.iter_mut().rev().find(|a| a.is_message()) {
            self.append_suggested_actions(ctx, last).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Middleware for MenuManager {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> Result<()> {
        ctx.state().insert(MENUS_KEY, self.clone()).await;
        ctx.on_send_activities(Arc::new(self.clone())).await;
        if ctx.activity().is_message() {
            self.recognize_utterance(ctx, next).await
        } else {
            next.run(ctx).await
        }
    }
}

/// 在 TurnContext 上取本轮的菜单管理器
#[async_trait]
pub trait MenuContextExt {
    async fn menus(&self) -> Result<MenuManager>;
}

#[async_trait]
impl MenuContextExt for TurnContext {
    async fn menus(&self) -> Result<MenuManager> {
        self.state()
            .get::<MenuManager>(MENUS_KEY)
            .await
            .ok_or(ToyboxError::ServiceUnavailable("menus"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{
        ActivitySink, BotAdapter, Choice, CollectingSink, FoundChoice, NoopHandler, TurnHandler,
    };
    use crate::memory::ScopeManager;
    use crate::menus::{ChoiceHandler, MenuChoice, MenuSettings, MergeStyle, ReplyHandler};
    use crate::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 按 "菜单名/输入" 命中；上下文菜单 "ctx" 的选项得 `ctx_score`，其余 0.9
    struct StubRecognizer {
        ctx_score: f64,
    }

    impl ChoiceRecognizer for StubRecognizer {
        fn find_choices(&self, utterance: &str, choices: &[Choice]) -> Vec<FoundChoice> {
            choices
                .iter()
                .enumerate()
                .filter(|(_, c)| c.value == utterance || c.value.ends_with(&format!("/{utterance}")))
                .map(|(index, c)| FoundChoice {
                    value: c.value.clone(),
                    index,
                    score: if c.value.starts_with("ctx/") { self.ctx_score } else { 0.9 },
                    synonym: c.value.clone(),
                })
                .collect()
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl ChoiceHandler for Counting {
        async fn on_choice(&self, _ctx: &TurnContext, _data: Option<Value>, _next: Next<'_>) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fallthrough(Arc<AtomicUsize>);

    #[async_trait]
    impl TurnHandler for Fallthrough {
        async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            ctx.send_text("fallback").await
        }
    }

    struct Fixture {
        adapter: BotAdapter,
        manager: MenuManager,
        storage: Arc<MemoryStorage>,
    }

    fn fixture(menus: Vec<Menu>, recognizer: Arc<dyn ChoiceRecognizer>) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let mut conversation = Scope::conversation(storage.clone());
        MenuManager::register_state(&mut conversation).unwrap();
        let conversation = Arc::new(conversation);
        let manager = MenuManager::with_recognizer(conversation.clone(), menus, recognizer).unwrap();
        let adapter = BotAdapter::new()
            .use_middleware(ScopeManager::new(vec![conversation]).unwrap())
            .use_middleware(manager.clone());
        Fixture {
            adapter,
            manager,
            storage,
        }
    }

    fn message(text: &str) -> Activity {
        Activity::message(text).with_address("test", "c1", "u1", "bot")
    }

    async fn send(fx: &Fixture, text: &str, handler: &dyn TurnHandler) -> Vec<Activity> {
        let sink: Arc<dyn ActivitySink> = Arc::new(CollectingSink::new());
        fx.adapter
            .process_activity(message(text), sink, handler)
            .await
            .unwrap()
    }

    fn action_values(activity: &Activity) -> Vec<String> {
        activity
            .suggested_actions
            .as_ref()
            .map(|s| {
                s.actions
                    .iter()
                    .map(|a| a.value.as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_context_menu_wins_over_default() {
        let default_hits = Arc::new(AtomicUsize::new(0));
        let context_hits = Arc::new(AtomicUsize::new(0));

        let mut main = Menu::new(
            "main",
            MenuSettings {
                is_default_menu: true,
                min_recognize_score: 0.5,
                ..Default::default()
            },
        )
        .unwrap();
        main.add_choice(MenuChoice::new("main/a"), Counting(default_hits.clone()))
            .unwrap();
        let mut ctx_menu = Menu::new(
            "ctx",
            MenuSettings {
                min_recognize_score: 0.5,
                ..Default::default()
            },
        )
        .unwrap();
        ctx_menu
            .add_choice(MenuChoice::new("ctx/a"), Counting(context_hits.clone()))
            .unwrap();

        let fx = fixture(vec![main, ctx_menu], Arc::new(StubRecognizer { ctx_score: 1.0 }));

        // 上下文菜单未显示时命中默认菜单
        send(&fx, "a", &NoopHandler).await;
        assert_eq!(default_hits.load(Ordering::SeqCst), 1);

        // 显示后由得分更高的上下文菜单处理
        let sink: Arc<dyn ActivitySink> = Arc::new(CollectingSink::new());
        struct Show(MenuManager);
        #[async_trait]
        impl TurnHandler for Show {
            async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
                self.0.show_menu(ctx, "ctx", None).await
            }
        }
        fx.adapter
            .process_activity(message("nothing"), sink, &Show(fx.manager.clone()))
            .await
            .unwrap();

        send(&fx, "a", &NoopHandler).await;
        assert_eq!(context_hits.load(Ordering::SeqCst), 1);
        assert_eq!(default_hits.load(Ordering::SeqCst), 1);
    }

    fn loose_menu(name: &str, is_default_menu: bool, choices: &[&str], hits: &Arc<AtomicUsize>) -> Menu {
        let mut menu = Menu::new(
            name,
            MenuSettings {
                is_default_menu,
                merge_style: MergeStyle::Right,
                min_recognize_score: 0.5,
                ..Default::default()
            },
        )
        .unwrap();
        for choice in choices {
            menu.add_choice(MenuChoice::new(format!("{name}/{choice}")), Counting(hits.clone()))
                .unwrap();
        }
        menu
    }

    struct ShowNamed(MenuManager, &'static str);

    #[async_trait]
    impl TurnHandler for ShowNamed {
        async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
            self.0.show_menu(ctx, self.1, None).await?;
            ctx.send_text("shown").await
        }
    }

    #[tokio::test]
    async fn test_default_menus_merge_and_tie_in_registration_order() {
        let d1_hits = Arc::new(AtomicUsize::new(0));
        let d2_hits = Arc::new(AtomicUsize::new(0));
        let d1 = loose_menu("d1", true, &["a", "b"], &d1_hits);
        let d2 = loose_menu("d2", true, &["a"], &d2_hits);
        let fx = fixture(vec![d1, d2], Arc::new(StubRecognizer { ctx_score: 0.9 }));

        let fallbacks = Arc::new(AtomicUsize::new(0));
        let sent = send(&fx, "zzz", &Fallthrough(fallbacks.clone())).await;
        assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
        assert_eq!(action_values(&sent[0]), vec!["d1/a", "d1/b", "d2/a"]);

        // 两个默认菜单同为 0.9，先注册的胜出
        send(&fx, "a", &NoopHandler).await;
        assert_eq!(d1_hits.load(Ordering::SeqCst), 1);
        assert_eq!(d2_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_context_menu_wins_tie_with_default() {
        let default_hits = Arc::new(AtomicUsize::new(0));
        let context_hits = Arc::new(AtomicUsize::new(0));
        let main = loose_menu("main", true, &["a"], &default_hits);
        let ctx_menu = loose_menu("ctx", false, &["a"], &context_hits);
        let fx = fixture(vec![main, ctx_menu], Arc::new(StubRecognizer { ctx_score: 0.9 }));

        let sent = send(&fx, "nothing", &ShowNamed(fx.manager.clone(), "ctx")).await;
        assert_eq!(action_values(&sent[0]), vec!["ctx/a", "main/a"]);

        send(&fx, "a", &NoopHandler).await;
        assert_eq!(context_hits.load(Ordering::SeqCst), 1);
        assert_eq!(default_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_huge_hide_after_keeps_menu() {
        let mut offer = Menu::new(
            "offer",
            MenuSettings {
                hide_after: Some(u64::MAX),
                ..Default::default()
            },
        )
        .unwrap();
        offer
            .add_choice(MenuChoice::new("accept"), ReplyHandler::new("Deal."))
            .unwrap();
        let fx = fixture(vec![offer], Arc::new(TokenChoiceRecognizer::new()));

        send(&fx, "start", &ShowNamed(fx.manager.clone(), "offer")).await;
        let sent = send(&fx, "hmm", &Fallthrough(Arc::new(AtomicUsize::new(0)))).await;
        assert_eq!(action_values(&sent[0]), vec!["accept"]);
    }

    #[tokio::test]
    async fn test_unrecognized_falls_through_with_default_actions() {
        let mut main = Menu::new(
            "main",
            MenuSettings {
                is_default_menu: true,
                ..Default::default()
            },
        )
        .unwrap();
        main.add_choice(MenuChoice::new("help"), ReplyHandler::new("Try 'count'."))
            .unwrap();
        let fx = fixture(vec![main], Arc::new(TokenChoiceRecognizer::new()));

        let fallbacks = Arc::new(AtomicUsize::new(0));
        let sent = send(&fx, "hello", &Fallthrough(fallbacks.clone())).await;
        assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
        assert_eq!(sent.len(), 1);
        assert_eq!(action_values(&sent[0]), vec!["help"]);

        let sent = send(&fx, "help", &Fallthrough(fallbacks.clone())).await;
        assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
        assert_eq!(sent[0].text.as_deref(), Some("Try 'count'."));
    }

    #[tokio::test]
    async fn test_hide_after_turns() {
        let mut survey = Menu::new(
            "survey",
            MenuSettings {
                hide_after_turns: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
        survey
            .add_choice(MenuChoice::new("yes"), ReplyHandler::new("thanks"))
            .unwrap();
        let fx = fixture(vec![survey], Arc::new(TokenChoiceRecognizer::new()));

        struct Show(MenuManager);
        #[async_trait]
        impl TurnHandler for Show {
            async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
                self.0.show_menu(ctx, "survey", Some(serde_json::json!({"id": 7})))
                    .await?;
                ctx.send_text("Quick survey?").await
            }
        }
        let sent = send(&fx, "start", &Show(fx.manager.clone())).await;
        assert_eq!(action_values(&sent[0]), vec!["yes"]);

        // 第 1 轮：仍显示
        let sent = send(&fx, "hmm", &Fallthrough(Arc::new(AtomicUsize::new(0)))).await;
        assert_eq!(action_values(&sent[0]), vec!["yes"]);

        // 第 2 轮：达到轮数后隐藏
        let sent = send(&fx, "hmm", &Fallthrough(Arc::new(AtomicUsize::new(0)))).await;
        assert!(action_values(&sent[0]).is_empty());
        assert!(fx.storage.write_count() >= 2);
    }

    #[tokio::test]
    async fn test_hide_after_click_passes_data() {
        struct Echo;
        #[async_trait]
        impl ChoiceHandler for Echo {
            async fn on_choice(&self, ctx: &TurnContext, data: Option<Value>, _next: Next<'_>) -> Result<()> {
                let id = data.and_then(|d| d["id"].as_i64()).unwrap_or(-1);
                ctx.send_text(format!("picked {id}")).await
            }
        }

        let mut pick = Menu::new(
            "pick",
            MenuSettings {
                hide_after_click: true,
                ..Default::default()
            },
        )
        .unwrap();
        pick.add_choice(MenuChoice::new("one"), Echo).unwrap();
        let fx = fixture(vec![pick], Arc::new(TokenChoiceRecognizer::new()));

        struct Show(MenuManager);
        #[async_trait]
        impl TurnHandler for Show {
            async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
                self.0.show_menu(ctx, "pick", Some(serde_json::json!({"id": 3})))
                    .await
            }
        }
        send(&fx, "go", &Show(fx.manager.clone())).await;

        let sent = send(&fx, "one", &NoopHandler).await;
        assert_eq!(sent[0].text.as_deref(), Some("picked 3"));
        assert!(action_values(&sent[0]).is_empty());
    }

    #[tokio::test]
    async fn test_show_unknown_menu_and_duplicates() {
        let fx = fixture(vec![], Arc::new(TokenChoiceRecognizer::new()));
        struct Show(MenuManager);
        #[async_trait]
        impl TurnHandler for Show {
            async fn on_turn(&self, ctx: &TurnContext) -> Result<()> {
                self.0.show_menu(ctx, "missing", None).await
            }
        }
        let sink: Arc<dyn ActivitySink> = Arc::new(CollectingSink::new());
        let result = fx
            .adapter
            .process_activity(message("x"), sink, &Show(fx.manager.clone()))
            .await;
        assert!(matches!(result, Err(ToyboxError::UnknownMenu(_))));

        let mut scope = Scope::conversation(Arc::new(MemoryStorage::new()));
        MenuManager::register_state(&mut scope).unwrap();
        let menus = vec![
            Menu::new("a", MenuSettings::default()).unwrap(),
            Menu::new("a", MenuSettings::default()).unwrap(),
        ];
        assert!(matches!(
            MenuManager::new(Arc::new(scope), menus),
            Err(ToyboxError::DuplicateMenu(_))
        ));
    }
}
