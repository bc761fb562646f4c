//! 菜单集成测试：折叠按钮展开为卡片、按时间自动隐藏、上下文菜单附带数据

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use toybox::framework::{
        Activity, AttachmentLayout, BotAdapter, CollectingSink, HeroCard, Next, TurnContext,
        TurnHandler,
    };
    use toybox::memory::{Scope, ScopeManager};
    use toybox::menus::{
        ChoiceHandler, Menu, MenuChoice, MenuContextExt, MenuManager, MenuSettings, ReplyHandler,
    };
    use toybox::storage::MemoryStorage;

    fn message(text: &str) -> Activity {
        Activity::message(text).with_address("test", "c1", "u1", "bot")
    }

    fn action_titles(activity: &Activity) -> Vec<String> {
        activity
            .suggested_actions
            .as_ref()
            .map(|s| s.actions.iter().map(|a| a.title.clone()).collect())
            .unwrap_or_default()
    }

    fn adapter(menus: Vec<Menu>) -> BotAdapter {
        let storage = Arc::new(MemoryStorage::new());
        let mut conversation = Scope::conversation(storage);
        MenuManager::register_state(&mut conversation).unwrap();
        let conversation = Arc::new(conversation);
        let manager = MenuManager::new(conversation.clone(), menus).unwrap();
        BotAdapter::new()
            .use_middleware(ScopeManager::new(vec![conversation]).unwrap())
            .use_middleware(manager)
    }

    /// 输入 "show <menu>" 时显示对应上下文菜单，否则回显
    struct Shower;

    #[async_trait]
    impl TurnHandler for Shower {
        async fn on_turn(&self, ctx: &TurnContext) -> toybox::Result<()> {
            let text = ctx.activity().trimmed_text().to_string();
            if let Some(name) = text.strip_prefix("show ") {
                ctx.menus()
                    .await?
                    .show_menu(ctx, name, Some(json!({ "order": 42 })))
                    .await?;
            }
            ctx.send_text(format!("echo {}", text)).await
        }
    }

    #[tokio::test]
    async fn test_button_menu_expands_to_cards() {
        let mut drinks = Menu::new(
            "drinks",
            MenuSettings {
                is_default_menu: true,
                show_as_button: true,
                button_title: Some("Drinks".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        drinks
            .add_choice(MenuChoice::new("tea").with_category("Hot"), ReplyHandler::new("Tea!"))
            .unwrap()
            .add_choice(MenuChoice::new("cola").with_category("Cold"), ReplyHandler::new("Cola!"))
            .unwrap()
            .add_choice(MenuChoice::new("coffee").with_category("Hot"), ReplyHandler::new("Coffee!"))
            .unwrap();
        let adapter = adapter(vec![drinks]);

        let sent = adapter
            .process_activity(message("hello"), Arc::new(CollectingSink::new()), &Shower)
            .await
            .unwrap();
        assert_eq!(action_titles(&sent[0]), vec!["Drinks"]);

        let sent = adapter
            .process_activity(message("menu:drinks"), Arc::new(CollectingSink::new()), &Shower)
            .await
            .unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attachment_layout, Some(AttachmentLayout::Carousel));
        let cards: Vec<HeroCard> = sent[0]
            .attachments
            .iter()
            .map(|a| serde_json::from_value(a.content.clone()).unwrap())
            .collect();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].title.as_deref(), Some("Hot"));
        assert_eq!(cards[0].buttons.len(), 2);

        // 展开后选项依然可直接识别
        let sent = adapter
            .process_activity(message("cola"), Arc::new(CollectingSink::new()), &Shower)
            .await
            .unwrap();
        assert_eq!(sent[0].text.as_deref(), Some("Cola!"));
    }

    #[tokio::test]
    async fn test_context_menu_hides_after_timeout() {
        let mut offer = Menu::new(
            "offer",
            MenuSettings {
                hide_after: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        offer
            .add_choice(MenuChoice::new("accept"), ReplyHandler::new("Deal."))
            .unwrap();
        let adapter = adapter(vec![offer]);

        let sent = adapter
            .process_activity(message("show offer"), Arc::new(CollectingSink::new()), &Shower)
            .await
            .unwrap();
        assert_eq!(action_titles(&sent[0]), vec!["accept"]);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        // 过期后即使输入命中也先隐藏，随后仍路由到处理器
        let sent = adapter
            .process_activity(message("accept"), Arc::new(CollectingSink::new()), &Shower)
            .await
            .unwrap();
        assert_eq!(sent[0].text.as_deref(), Some("Deal."));
        assert!(action_titles(&sent[0]).is_empty());
    }

    struct OrderHandler;

    #[async_trait]
    impl ChoiceHandler for OrderHandler {
        async fn on_choice(
            &self,
            ctx: &TurnContext,
            data: Option<Value>,
            next: Next<'_>,
        ) -> toybox::Result<()> {
            let order = data.and_then(|d| d["order"].as_i64());
            ctx.send_text(format!("order {:?}", order)).await?;
            next.run(ctx).await
        }
    }

    #[tokio::test]
    async fn test_context_data_and_next() {
        let mut orders = Menu::new("orders", MenuSettings::default()).unwrap();
        orders
            .add_choice(MenuChoice::new("status"), OrderHandler)
            .unwrap();
        let adapter = adapter(vec![orders]);

        adapter
            .process_activity(message("show orders"), Arc::new(CollectingSink::new()), &Shower)
            .await
            .unwrap();

        let sent = adapter
            .process_activity(message("status"), Arc::new(CollectingSink::new()), &Shower)
            .await
            .unwrap();
        let texts: Vec<_> = sent.iter().filter_map(|a| a.text.clone()).collect();
        assert_eq!(texts, vec!["order Some(42)", "echo status"]);
        // 建议动作只附加在每批的最后一条消息上，每次发送各成一批
        assert_eq!(action_titles(&sent[1]), vec!["status"]);
    }
}
