//! Update polling loop.
//!
//! Long-polls `getUpdates`, filters messages to the configured chat, and
//! dispatches parsed commands. The loop is cancelled through the shared
//! shutdown handle; an in-flight long poll is simply dropped.

use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode, UpdateKind};
use tokio::sync::Notify;

use super::commands::{handle_command, Command};
use super::CommandContext;
use crate::logger::{self, LogTag};
use crate::utils::check_shutdown_or_delay;

/// How long one `getUpdates` long poll waits server-side, in seconds
const LONG_POLL_SECS: u32 = 25;

/// Delay before retrying after a polling error
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Poll for commands until shutdown
pub async fn run_polling(
    bot: Bot,
    chat_id: ChatId,
    ctx: Arc<CommandContext>,
    shutdown: Arc<Notify>,
) {
    logger::info(LogTag::Telegram, "command polling started");
    let mut offset: i32 = 0;

    loop {
        let updates = tokio::select! {
            _ = shutdown.notified() => {
                logger::info(LogTag::Telegram, "command polling shutting down");
                break;
            }
            result = bot.get_updates().offset(offset).timeout(LONG_POLL_SECS).send() => result,
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => {
                logger::warning(LogTag::Telegram, &format!("getUpdates failed: {}", e));
                if check_shutdown_or_delay(&shutdown, POLL_RETRY_DELAY).await {
                    break;
                }
                continue;
            }
        };

        for update in updates {
            offset = update.id + 1;

            let UpdateKind::Message(message) = update.kind else {
                continue;
            };
            if message.chat.id != chat_id {
                logger::debug(
                    LogTag::Telegram,
                    &format!("ignoring message from chat {}", message.chat.id),
                );
                continue;
            }
            let Some(text) = message.text() else {
                continue;
            };
            let Some(command) = Command::parse(text) else {
                continue;
            };

            logger::info(LogTag::Telegram, &format!("command: {:?}", command));
            let reply = handle_command(&ctx, command).await;

            if let Err(e) = bot
                .send_message(chat_id, reply)
                .parse_mode(ParseMode::Html)
                .disable_web_page_preview(true)
                .send()
                .await
            {
                logger::error(LogTag::Telegram, &format!("failed to send reply: {}", e));
            }
        }
    }
}
