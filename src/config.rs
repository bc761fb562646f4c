//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TOYBOX__*` 覆盖（双下划线表示嵌套，如 `TOYBOX__STORAGE__BACKEND=file`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub typing: TypingSection,
    #[serde(default)]
    pub menus: MenusSection,
    #[serde(default)]
    pub http: HttpSection,
}

/// [app] 段：机器人名称与 ID（ID 用作控制台活动的 recipient，也出现在存储键中）
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_bot_id")]
    pub bot_id: String,
    /// 控制台演示使用的频道 ID
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            bot_id: default_bot_id(),
            channel_id: default_channel_id(),
        }
    }
}

fn default_bot_id() -> String {
    "toybox".to_string()
}

fn default_channel_id() -> String {
    "console".to_string()
}

/// [storage] 段：后端 memory / file；file 需要 path
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    pub path: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}

/// [typing] 段：输入中提示的首次延迟与重复间隔（毫秒）
#[derive(Debug, Clone, Deserialize)]
pub struct TypingSection {
    #[serde(default = "default_typing_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_typing_period_ms")]
    pub period_ms: u64,
}

impl Default for TypingSection {
    fn default() -> Self {
        Self {
            delay_ms: default_typing_delay_ms(),
            period_ms: default_typing_period_ms(),
        }
    }
}

fn default_typing_delay_ms() -> u64 {
    500
}

fn default_typing_period_ms() -> u64 {
    2000
}

/// [menus] 段：菜单识别的默认最低得分（1.0 = 要求完全匹配）
#[derive(Debug, Clone, Deserialize)]
pub struct MenusSection {
    #[serde(default = "default_min_recognize_score")]
    pub min_recognize_score: f64,
}

impl Default for MenusSection {
    fn default() -> Self {
        Self {
            min_recognize_score: default_min_recognize_score(),
        }
    }
}

fn default_min_recognize_score() -> f64 {
    1.0
}

/// [http] 段：监听地址与同时处理的轮次上限
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// 默认 1：所有轮次串行，保证同一会话的状态不被并发写
    #[serde(default = "default_max_concurrent_turns")]
    pub max_concurrent_turns: usize,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_concurrent_turns: default_max_concurrent_turns(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3978".to_string()
}

fn default_max_concurrent_turns() -> usize {
    1
}

/// 从 config 目录加载配置，环境变量 TOYBOX__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TOYBOX__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TOYBOX")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.menus.min_recognize_score, 1.0);
        assert_eq!(config.http.max_concurrent_turns, 1);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.toml");
        std::fs::write(
            &path,
            "[app]\nbot_id = \"b1\"\n\n[storage]\nbackend = \"file\"\npath = \"state\"\n\n[typing]\ndelay_ms = 10\n",
        )
        .unwrap();

        let config = load_config(Some(path)).unwrap();
        assert_eq!(config.app.bot_id, "b1");
        assert_eq!(config.storage.backend, "file");
        assert_eq!(config.storage.path, Some(PathBuf::from("state")));
        assert_eq!(config.typing.delay_ms, 10);
        assert_eq!(config.typing.period_ms, 2000);
    }
}
