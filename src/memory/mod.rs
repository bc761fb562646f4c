//! 记忆层：作用域（持久化边界）、片段（作用域内的具名值）、轮内缓存与按访问模式预加载

mod accessor;
mod fragment;
mod manager;
mod scope;

pub use accessor::{ScopeAccessor, ScopeContextExt, ScopeRegistry};
pub use fragment::{Fragment, FragmentSpec};
pub(crate) use fragment::elapsed_millis;
pub use manager::{AccessPattern, AccessPatterns, ScopeManager};
pub use scope::{KeyFn, KeyStrategy, Scope};
