//! 宿主框架契约
//!
//! 工具箱依赖的最小宿主能力：活动模型、轮次上下文（含本轮状态与发送钩子）、中间件管线、
//! 适配器与选项识别。真实部署时由宿主框架提供同等实现。

pub mod activity;
mod adapter;
mod choices;
mod context;
mod middleware;

pub use activity::{
    action_types, activity_types, Activity, Attachment, AttachmentLayout, CardAction,
    ChannelAccount, ConversationAccount, HeroCard, SuggestedActions,
};
pub use adapter::BotAdapter;
pub use choices::{tokenize, Choice, ChoiceRecognizer, FoundChoice, TokenChoiceRecognizer};
pub use context::{ActivitySink, CollectingSink, SendHook, TurnContext, TurnState};
pub use middleware::{Middleware, Next, NoopHandler, TurnHandler};
