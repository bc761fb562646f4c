//! 活动（Activity）协议定义
//!
//! 与宿主框架一致的 JSON 结构（camelCase），入站消息与出站回复共用同一类型。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 活动类型常量
pub mod activity_types {
    pub const MESSAGE: &str = "message";
    pub const TYPING: &str = "typing";
    pub const CONVERSATION_UPDATE: &str = "conversationUpdate";
    pub const EVENT: &str = "event";
}

/// 卡片按钮动作类型常量
pub mod action_types {
    pub const IM_BACK: &str = "imBack";
    pub const POST_BACK: &str = "postBack";
    pub const OPEN_URL: &str = "openUrl";
}

/// 频道账号（用户或机器人）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChannelAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// 会话账号
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_group: Option<bool>,
}

impl ConversationAccount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            is_group: None,
        }
    }
}

/// 卡片按钮 / 建议动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub title: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl CardAction {
    /// imBack：点击后把 value 作为用户消息回发
    pub fn im_back(title: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action_type: action_types::IM_BACK.to_string(),
            title: title.into(),
            value: Value::String(value.into()),
            image: None,
        }
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestedActions {
    #[serde(default)]
    pub actions: Vec<CardAction>,
}

/// 英雄卡片：标题 + 一组按钮
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub buttons: Vec<CardAction>,
}

impl HeroCard {
    pub const CONTENT_TYPE: &'static str = "application/vnd.microsoft.card.hero";

    pub fn to_attachment(&self) -> Result<Attachment, serde_json::Error> {
        Ok(Attachment {
            content_type: Self::CONTENT_TYPE.to_string(),
            content: serde_json::to_value(self)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub content_type: String,
    pub content: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentLayout {
    List,
    Carousel,
}

/// 活动
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// 按钮回发的结构化负载（postBack 等）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_actions: Option<SuggestedActions>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_layout: Option<AttachmentLayout>,
}

impl Activity {
    pub fn new(activity_type: impl Into<String>) -> Self {
        Self {
            activity_type: activity_type.into(),
            id: Some(uuid::Uuid::new_v4().to_string()),
            ..Default::default()
        }
    }

    pub fn message(text: impl Into<String>) -> Self {
        let mut activity = Self::new(activity_types::MESSAGE);
        activity.text = Some(text.into());
        activity
    }

    pub fn typing() -> Self {
        Self::new(activity_types::TYPING)
    }

    pub fn is_message(&self) -> bool {
        self.activity_type == activity_types::MESSAGE
    }

    /// 设置会话地址（入站活动用）
    pub fn with_address(
        mut self,
        channel_id: impl Into<String>,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        bot_id: impl Into<String>,
    ) -> Self {
        self.channel_id = Some(channel_id.into());
        self.conversation = Some(ConversationAccount::new(conversation_id));
        self.from = Some(ChannelAccount::new(user_id));
        self.recipient = Some(ChannelAccount::new(bot_id));
        self
    }

    /// 将入站活动的会话地址补到出站活动上（from/recipient 互换），已有字段不覆盖
    pub fn apply_reference(&mut self, incoming: &Activity) {
        if self.channel_id.is_none() {
            self.channel_id = incoming.channel_id.clone();
        }
        if self.conversation.is_none() {
            self.conversation = incoming.conversation.clone();
        }
        if self.from.is_none() {
            self.from = incoming.recipient.clone();
        }
        if self.recipient.is_none() {
            self.recipient = incoming.from.clone();
        }
        if self.reply_to_id.is_none() {
            self.reply_to_id = incoming.id.clone();
        }
    }

    /// 文本去首尾空白后的内容（无文本时为空串）
    pub fn trimmed_text(&self) -> &str {
        self.text.as_deref().map(str::trim).unwrap_or("")
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref().filter(|s| !s.is_empty())
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation
            .as_ref()
            .map(|c| c.id.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.from
            .as_ref()
            .map(|a| a.id.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn bot_id(&self) -> Option<&str> {
        self.recipient
            .as_ref()
            .map(|a| a.id.as_str())
            .filter(|s| !s.is_empty())
    }
}
