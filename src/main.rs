//! Toybox 控制台演示
//!
//! 每行输入作为一条用户消息跑一轮，回复与建议动作直接打印；输入 `quit` 退出。
//! 启动时先发送一个 conversationUpdate 活动触发欢迎语。

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use toybox::bot::Bot;
use toybox::config::load_config;
use toybox::framework::{activity_types, Activity, ActivitySink};

const CONVERSATION_ID: &str = "console";
const USER_ID: &str = "user";

/// 把活动打印到终端
struct ConsoleSink;

#[async_trait]
impl ActivitySink for ConsoleSink {
    async fn deliver(&self, activities: &[Activity]) -> toybox::Result<()> {
        for activity in activities {
            if activity.activity_type == activity_types::TYPING {
                println!("...");
                continue;
            }
            if let Some(text) = activity.text.as_deref().filter(|t| !t.is_empty()) {
                println!("bot> {}", text);
            }
            for attachment in &activity.attachments {
                let title = attachment.content["title"].as_str().unwrap_or_default();
                let buttons: Vec<&str> = attachment.content["buttons"]
                    .as_array()
                    .map(|b| b.iter().filter_map(|a| a["title"].as_str()).collect())
                    .unwrap_or_default();
                println!("  [{}] {}", title, buttons.join(" | "));
            }
            if let Some(suggested) = &activity.suggested_actions {
                let titles: Vec<&str> = suggested.actions.iter().map(|a| a.title.as_str()).collect();
                if !titles.is_empty() {
                    println!("  ({})", titles.join(" | "));
                }
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    toybox::observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    let bot = Bot::build(&config).context("Failed to assemble bot")?;
    let sink: Arc<dyn ActivitySink> = Arc::new(ConsoleSink);

    let address = |activity: Activity| {
        activity.with_address(
            config.app.channel_id.clone(),
            CONVERSATION_ID,
            USER_ID,
            config.app.bot_id.clone(),
        )
    };

    bot.process(
        address(Activity::new(activity_types::CONVERSATION_UPDATE)),
        sink.clone(),
    )
    .await
    .context("Welcome turn failed")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }
        if let Err(e) = bot.process(address(Activity::message(line)), sink.clone()).await {
            tracing::error!(error = %e, "Turn failed");
            println!("bot> (error: {})", e);
        }
    }

    Ok(())
}
