//! 常用中间件：输入中提示、版本检查、按活动类型过滤

mod filter;
mod typing;
mod version;

pub use filter::{FilterActivity, TurnFilter};
pub use typing::ShowTyping;
pub use version::{CheckVersion, ResetScope, VersionChangedHandler};
