//! 菜单：默认菜单与上下文菜单、建议动作合并、卡片渲染、按得分路由到选项处理器

mod manager;
mod menu;

pub use manager::{MenuContextExt, MenuManager, ShownMenu, SHOWN_MENU_FRAGMENT};
pub use menu::{
    ChoiceHandler, MatchKind, Menu, MenuChoice, MenuMatch, MenuSettings, MergeStyle, ReplyHandler,
};
