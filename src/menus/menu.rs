//! 菜单
//!
//! 菜单持有一组有序选项（value / title / 自定义动作）、选项到处理器的映射和挂在选项下的子菜单。
//! 可渲染为建议动作（按合并策略拼到出站消息上）或按分类渲染为卡片轮播；
//! 识别时依次对折叠按钮、自身选项、各子菜单打分，取最高分。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Result, ToyboxError};
use crate::framework::{
    activity_types, Activity, AttachmentLayout, CardAction, Choice, ChoiceRecognizer, HeroCard,
    Next, TurnContext,
};

/// 建议动作合并策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStyle {
    /// 已有建议动作时不合并
    #[default]
    None,
    /// 插到已有动作之前
    Left,
    /// 追加到已有动作之后
    Right,
}

/// 菜单设置
#[derive(Debug, Clone)]
pub struct MenuSettings {
    /// 默认菜单始终生效，不参与显示 / 隐藏
    pub is_default_menu: bool,
    /// 折叠为一个按钮显示，点击后以卡片展开
    pub show_as_button: bool,
    /// 折叠按钮标题（默认菜单名）
    pub button_title: Option<String>,
    pub merge_style: MergeStyle,
    /// 识别最低得分（0.0–1.0，1.0 要求完全匹配）
    pub min_recognize_score: f64,
    /// 显示超过多少秒后自动隐藏
    pub hide_after: Option<u64>,
    /// 显示后经过多少轮自动隐藏
    pub hide_after_turns: Option<u32>,
    /// 命中本菜单的选项后自动隐藏
    pub hide_after_click: bool,
}

impl Default for MenuSettings {
    fn default() -> Self {
        Self {
            is_default_menu: false,
            show_as_button: false,
            button_title: None,
            merge_style: MergeStyle::Right,
            min_recognize_score: 1.0,
            hide_after: None,
            hide_after_turns: None,
            hide_after_click: false,
        }
    }
}

/// 菜单选项
#[derive(Debug, Clone, PartialEq)]
pub struct MenuChoice {
    pub value: String,
    pub title: Option<String>,
    pub image_url: Option<String>,
    /// 卡片分组（默认菜单名）
    pub category: Option<String>,
    pub synonyms: Vec<String>,
    /// 自定义渲染动作（默认 imBack）
    pub action: Option<CardAction>,
}

impl MenuChoice {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            title: None,
            image_url: None,
            category: None,
            synonyms: Vec::new(),
            action: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_synonyms<I, S>(mut self, synonyms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.synonyms = synonyms.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_action(mut self, action: CardAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.value)
    }

    fn to_action(&self) -> CardAction {
        self.action.clone().unwrap_or_else(|| {
            CardAction::im_back(self.display_title(), self.value.clone())
                .with_image(self.image_url.clone())
        })
    }

    fn to_choice(&self) -> Choice {
        Choice {
            value: self.value.clone(),
            title: self.title.clone(),
            synonyms: self.synonyms.clone(),
        }
    }
}

/// 选项处理器：由处理器决定是否调用 `next.run(ctx)` 继续路由
#[async_trait]
pub trait ChoiceHandler: Send + Sync {
    async fn on_choice(&self, ctx: &TurnContext, data: Option<Value>, next: Next<'_>) -> Result<()>;
}

/// 回复一段文本并结束本轮
pub struct ReplyHandler {
    text: String,
}

impl ReplyHandler {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl ChoiceHandler for ReplyHandler {
    async fn on_choice(&self, ctx: &TurnContext, _data: Option<Value>, _next: Next<'_>) -> Result<()> {
        ctx.send_text(self.text.clone()).await
    }
}

/// 命中来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// 折叠按钮
    Button,
    Choice,
}

/// 识别结果：命中的菜单（可能是子菜单）、来源、选项值与得分
#[derive(Clone)]
pub struct MenuMatch<'a> {
    pub menu: &'a Menu,
    pub kind: MatchKind,
    pub value: String,
    pub score: f64,
}

impl std::fmt::Debug for MenuMatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MenuMatch")
            .field("menu", &self.menu.name())
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("score", &self.score)
            .finish()
    }
}

/// 菜单
pub struct Menu {
    name: String,
    settings: MenuSettings,
    choices: Vec<MenuChoice>,
    handlers: HashMap<String, Arc<dyn ChoiceHandler>>,
    children: HashMap<String, Arc<Menu>>,
}

impl Menu {
    /// 默认菜单不允许设置任何 hide_after* 规则
    pub fn new(name: impl Into<String>, settings: MenuSettings) -> Result<Self> {
        let name = name.into();
        if settings.is_default_menu
            && (settings.hide_after.is_some()
                || settings.hide_after_turns.is_some()
                || settings.hide_after_click)
        {
            return Err(ToyboxError::InvalidMenuSettings {
                menu: name,
                reason: "default menus can't use hide_after rules".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&settings.min_recognize_score) {
            return Err(ToyboxError::InvalidMenuSettings {
                menu: name,
                reason: format!(
                    "min_recognize_score {} is outside 0.0..=1.0",
                    settings.min_recognize_score
                ),
            });
        }
        Ok(Self {
            name,
            settings,
            choices: Vec::new(),
            handlers: HashMap::new(),
            children: HashMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &MenuSettings {
        &self.settings
    }

    pub fn choices(&self) -> &[MenuChoice] {
        &self.choices
    }

    fn push_choice(&mut self, choice: MenuChoice) -> Result<()> {
        if self.choices.iter().any(|c| c.value == choice.value) {
            return Err(ToyboxError::DuplicateChoice {
                menu: self.name.clone(),
                choice: choice.value,
            });
        }
        self.choices.push(choice);
        Ok(())
    }

    /// 添加选项及其处理器；value 在菜单内必须唯一
    pub fn add_choice(
        &mut self,
        choice: MenuChoice,
        handler: impl ChoiceHandler + 'static,
    ) -> Result<&mut Self> {
        let value = choice.value.clone();
        self.push_choice(choice)?;
        self.handlers.insert(value, Arc::new(handler));
        Ok(self)
    }

    /// 添加挂着子菜单的选项；选中时展示子菜单的建议动作
    pub fn add_submenu(&mut self, choice: MenuChoice, child: Menu) -> Result<&mut Self> {
        let value = choice.value.clone();
        self.push_choice(choice)?;
        self.children.insert(value, Arc::new(child));
        Ok(self)
    }

    /// 为已有选项替换处理器（如给子菜单选项额外绑定处理器）
    pub fn set_handler(&mut self, value: &str, handler: impl ChoiceHandler + 'static) -> Result<&mut Self> {
        if !self.choices.iter().any(|c| c.value == value) {
            return Err(ToyboxError::UnknownChoice {
                menu: self.name.clone(),
                choice: value.to_string(),
            });
        }
        self.handlers.insert(value.to_string(), Arc::new(handler));
        Ok(self)
    }

    pub fn child(&self, value: &str) -> Option<&Menu> {
        self.children.get(value).map(|c| c.as_ref())
    }

    /// 折叠按钮的选项值
    pub fn button_value(&self) -> String {
        format!("menu:{}", self.name)
    }

    fn button_choice(&self) -> MenuChoice {
        MenuChoice::new(self.button_value())
            .with_title(self.settings.button_title.as_deref().unwrap_or(&self.name))
    }

    /// 识别入站文本；最高分低于 min_recognize_score 时返回 None
    pub fn recognize_choice(
        &self,
        ctx: &TurnContext,
        recognizer: &dyn ChoiceRecognizer,
    ) -> Option<MenuMatch<'_>> {
        let utterance = ctx.activity().trimmed_text();
        if utterance.is_empty() {
            return None;
        }
        self.best_match(utterance, recognizer)
            .filter(|m| m.score >= self.settings.min_recognize_score)
    }

    /// 按钮 → 自身选项 → 子菜单（递归），同分保留先找到的
    fn best_match(&self, utterance: &str, recognizer: &dyn ChoiceRecognizer) -> Option<MenuMatch<'_>> {
        let mut best: Option<MenuMatch<'_>> = None;

        if self.settings.show_as_button {
            let button = [self.button_choice().to_choice()];
            if let Some(found) = recognizer.find_choices(utterance, &button).into_iter().next() {
                keep_best(&mut best, MenuMatch {
                    menu: self,
                    kind: MatchKind::Button,
                    value: found.value,
                    score: found.score,
                });
            }
        }

        let choices: Vec<Choice> = self.choices.iter().map(MenuChoice::to_choice).collect();
        if let Some(found) = recognizer.find_choices(utterance, &choices).into_iter().next() {
            keep_best(&mut best, MenuMatch {
                menu: self,
                kind: MatchKind::Choice,
                value: found.value,
                score: found.score,
            });
        }

        for choice in &self.choices {
            if let Some(child) = self.children.get(&choice.value) {
                if let Some(found) = child.best_match(utterance, recognizer) {
                    keep_best(&mut best, found);
                }
            }
        }

        best
    }

    /// 把菜单渲染为建议动作合并到活动上
    ///
    /// 活动尚无建议动作时，即使合并策略为 None 也按 Right 填充。
    pub fn render_suggested_actions(&self, activity: &mut Activity) {
        let suggested = activity.suggested_actions.get_or_insert_with(Default::default);

        let style = match self.settings.merge_style {
            MergeStyle::None if suggested.actions.is_empty() => MergeStyle::Right,
            style => style,
        };

        let rendered: Vec<CardAction> = if self.settings.show_as_button {
            vec![self.button_choice().to_action()]
        } else {
            self.choices.iter().map(MenuChoice::to_action).collect()
        };

        match style {
            MergeStyle::None => {}
            MergeStyle::Left => {
                let existing = std::mem::replace(&mut suggested.actions, rendered);
                suggested.actions.extend(existing);
            }
            MergeStyle::Right => suggested.actions.extend(rendered),
        }
    }

    /// 按分类生成卡片（每个分类一张，分类顺序按首次出现）
    pub fn cards(&self) -> Vec<HeroCard> {
        let mut cards: Vec<HeroCard> = Vec::new();
        for choice in &self.choices {
            let category = choice.category.as_deref().unwrap_or(&self.name);
            let action = choice.to_action();
            match cards
                .iter_mut()
                .find(|c| c.title.as_deref() == Some(category))
            {
                Some(card) => card.buttons.push(action),
                None => cards.push(HeroCard {
                    title: Some(category.to_string()),
                    text: None,
                    buttons: vec![action],
                }),
            }
        }
        cards
    }

    /// 以卡片轮播发送整个菜单
    pub async fn render_cards(&self, ctx: &TurnContext) -> Result<()> {
        let mut activity = Activity::new(activity_types::MESSAGE);
        activity.attachment_layout = Some(AttachmentLayout::Carousel);
        activity.attachments = self
            .cards()
            .iter()
            .map(HeroCard::to_attachment)
            .collect::<std::result::Result<Vec<_>, serde_json::Error>>()?;
        ctx.send_activity(activity).await
    }
}

/// 同分保留先找到的
fn keep_best<'a>(best: &mut Option<MenuMatch<'a>>, candidate: MenuMatch<'a>) {
    if best.as_ref().map_or(true, |b| candidate.score > b.score) {
        *best = Some(candidate);
    }
}

impl MenuMatch<'_> {
    /// 执行命中结果：按钮展开卡片；有处理器交给处理器；有子菜单展示子菜单；否则继续路由
    pub async fn invoke(&self, ctx: &TurnContext, data: Option<Value>, next: Next<'_>) -> Result<()> {
        let owner = self.menu;
        tracing::debug!(menu = %owner.name, value = %self.value, score = self.score, "Menu choice recognized");

        if self.kind == MatchKind::Button {
            return owner.render_cards(ctx).await;
        }
        if let Some(handler) = owner.handlers.get(&self.value) {
            return handler.on_choice(ctx, data, next).await;
        }
        if let Some(child) = owner.children.get(&self.value) {
            let title = owner
                .choices
                .iter()
                .find(|c| c.value == self.value)
                .map(|c| c.display_title().to_string())
                .unwrap_or_else(|| child.name.clone());
            let mut reply = Activity::message(title);
            child.render_suggested_actions(&mut reply);
            return ctx.send_activity(reply).await;
        }
        next.run(ctx).await
    }
}
