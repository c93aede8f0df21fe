//! Telegram delivery for operator notifications.
//!
//! Renders notifications as HTML messages with explorer links and sends
//! them to the configured chat through teloxide.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};

use super::types::{Notification, NotificationType};
use super::Notifier;
use crate::constants::{self, NATIVE_SYMBOL, TOKEN_SYMBOL};
use crate::logger::{self, LogTag};
use crate::utils::{format_amount, html_escape, short_address};

/// Telegram notifier for sending messages
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    /// Create a new Telegram notifier
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self, String> {
        if bot_token.is_empty() {
            return Err("Bot token is empty".to_string());
        }
        if chat_id.is_empty() {
            return Err("Chat ID is empty".to_string());
        }

        let chat_id_parsed: i64 = chat_id
            .parse()
            .map_err(|e| format!("Invalid chat ID '{}': {}", chat_id, e))?;

        Ok(Self {
            bot: Bot::new(bot_token),
            chat_id: ChatId(chat_id_parsed),
        })
    }

    /// Send a plain text message to the configured chat
    pub async fn send_message(&self, message: &str) -> Result<(), String> {
        self.bot
            .send_message(self.chat_id, message)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true)
            .send()
            .await
            .map_err(|e| format!("Failed to send Telegram message: {}", e))?;

        logger::debug(
            LogTag::Telegram,
            &format!("sent notification (length={})", message.len()),
        );
        Ok(())
    }

    /// Format a notification into a Telegram HTML message
    pub fn format_notification(notification: &Notification) -> String {
        match &notification.notification_type {
            NotificationType::LowBalance {
                instance,
                role,
                address,
                observed,
                threshold,
            } => {
                format!(
                    "⚠️ <b>Low balance</b>\n\n\
                     [{}] <a href=\"{}\">{}</a> balance is {} {} (threshold {} {})",
                    html_escape(instance),
                    constants::address_url(address),
                    role,
                    format_amount(*observed),
                    NATIVE_SYMBOL,
                    format_amount(*threshold),
                    NATIVE_SYMBOL,
                )
            }

            NotificationType::BalanceRecovered {
                instance,
                role,
                address,
                observed,
                threshold,
            } => {
                format!(
                    "✅ <b>Balance recovered</b>\n\n\
                     [{}] <a href=\"{}\">{}</a> balance is back at {} {} (threshold {} {})",
                    html_escape(instance),
                    constants::address_url(address),
                    role,
                    format_amount(*observed),
                    NATIVE_SYMBOL,
                    format_amount(*threshold),
                    NATIVE_SYMBOL,
                )
            }

            NotificationType::ChainHealth {
                instance,
                consecutive_failures,
                error,
            } => {
                format!(
                    "🔌 <b>Chain read failures</b>\n\n\
                     [{}] {} consecutive failed reads\nLast error: <code>{}</code>",
                    html_escape(instance),
                    consecutive_failures,
                    html_escape(error),
                )
            }

            NotificationType::ChainRecovered {
                instance,
                after_failures,
            } => {
                format!(
                    "🔌 <b>Chain reads recovered</b>\n\n[{}] reads succeeding again after {} failures",
                    html_escape(instance),
                    after_failures,
                )
            }

            NotificationType::ClaimCompleted {
                instance,
                trigger,
                amount,
                tx_hash,
            } => match tx_hash {
                Some(tx_hash) => format!(
                    "💰 <b>Claim completed</b> ({})\n\n\
                     [{}] Claimed {} {} into the Master Safe — <a href=\"{}\">transaction</a>",
                    trigger,
                    html_escape(instance),
                    format_amount(*amount),
                    TOKEN_SYMBOL,
                    constants::tx_url(tx_hash),
                ),
                None => format!(
                    "💰 <b>Claim completed</b> ({})\n\n[{}] No rewards to claim",
                    trigger,
                    html_escape(instance),
                ),
            },

            NotificationType::ClaimFailed {
                instance,
                trigger,
                stage,
                reason,
            } => {
                format!(
                    "❌ <b>Claim failed</b> ({})\n\n\
                     [{}] Failed during {}: <code>{}</code>",
                    trigger,
                    html_escape(instance),
                    stage,
                    html_escape(reason),
                )
            }

            NotificationType::WithdrawCompleted {
                instance,
                trigger,
                transfers,
                destination,
            } => {
                if transfers.is_empty() {
                    return format!(
                        "🏦 <b>Withdrawal completed</b> ({})\n\n[{}] No rewards to withdraw",
                        trigger,
                        html_escape(instance),
                    );
                }

                let mut message = format!(
                    "🏦 <b>Withdrawal completed</b> ({})\n\n[{}]",
                    trigger,
                    html_escape(instance),
                );
                for transfer in transfers {
                    message.push_str(&format!(
                        "\nSent {} {} from the {} to <a href=\"{}\">{}</a> — <a href=\"{}\">transaction</a> #withdraw",
                        format_amount(transfer.amount),
                        TOKEN_SYMBOL,
                        transfer.source,
                        constants::address_url(destination),
                        short_address(destination),
                        constants::tx_url(&transfer.tx_hash),
                    ));
                }
                message
            }

            NotificationType::WithdrawFailed {
                instance,
                trigger,
                stage,
                reason,
                completed,
            } => {
                let mut message = format!(
                    "❌ <b>Withdrawal failed</b> ({})\n\n\
                     [{}] Failed during {}: <code>{}</code>",
                    trigger,
                    html_escape(instance),
                    stage,
                    html_escape(reason),
                );
                for transfer in completed {
                    message.push_str(&format!(
                        "\nConfirmed before failure: {} {} from the {} — <a href=\"{}\">transaction</a>",
                        format_amount(transfer.amount),
                        TOKEN_SYMBOL,
                        transfer.source,
                        constants::tx_url(&transfer.tx_hash),
                    ));
                }
                message
            }

            NotificationType::BotStarted { version, instances } => {
                format!(
                    "🤖 <b>stakerbot v{}</b> started — monitoring {} instance{}",
                    version,
                    instances,
                    if *instances == 1 { "" } else { "s" },
                )
            }

            NotificationType::BotStopped { reason } => {
                format!("🤖 stakerbot stopped: {}", html_escape(reason))
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), String> {
        let message = Self::format_notification(notification);
        self.send_message(&message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::{TriggerKind, WithdrawTransfer};

    #[test]
    fn low_balance_message_carries_context() {
        let notification = Notification::low_balance("trader-1", "Agent EOA", "0xabc", 0.05, 0.1);
        let message = TelegramNotifier::format_notification(&notification);
        assert!(message.contains("trader-1"));
        assert!(message.contains("Agent EOA"));
        assert!(message.contains("0.05"));
        assert!(message.contains("0.1"));
        assert!(message.contains("gnosisscan.io/address/0xabc"));
    }

    #[test]
    fn nothing_to_claim_renders_without_tx() {
        let notification =
            Notification::claim_completed("trader-1", TriggerKind::Autoclaim, 0.0, None);
        let message = TelegramNotifier::format_notification(&notification);
        assert!(message.contains("No rewards to claim"));
        assert!(message.contains("autoclaim"));
        assert!(!message.contains("/tx/"));
    }

    #[test]
    fn withdrawal_lists_every_transfer() {
        let notification = Notification::withdraw_completed(
            "trader-1",
            TriggerKind::Manual,
            vec![
                WithdrawTransfer {
                    tx_hash: "0x1".to_string(),
                    amount: 10.0,
                    source: "Master Safe".to_string(),
                },
                WithdrawTransfer {
                    tx_hash: "0x2".to_string(),
                    amount: 2.5,
                    source: "Service Safe".to_string(),
                },
            ],
            "0xdest",
        );
        let message = TelegramNotifier::format_notification(&notification);
        assert!(message.contains("Master Safe"));
        assert!(message.contains("Service Safe"));
        assert!(message.contains("gnosisscan.io/tx/0x1"));
        assert!(message.contains("gnosisscan.io/tx/0x2"));
        assert!(message.contains("#withdraw"));
    }

    #[test]
    fn html_is_escaped_in_error_reasons() {
        let notification = Notification::claim_failed(
            "trader-1",
            TriggerKind::Manual,
            "submission".to_string(),
            "error <at> stage & more".to_string(),
        );
        let message = TelegramNotifier::format_notification(&notification);
        assert!(message.contains("error &lt;at&gt; stage &amp; more"));
    }

    #[test]
    fn rejects_empty_credentials() {
        assert!(TelegramNotifier::new("", "123").is_err());
        assert!(TelegramNotifier::new("token", "").is_err());
        assert!(TelegramNotifier::new("token", "not-a-number").is_err());
        assert!(TelegramNotifier::new("token", "-1001234").is_ok());
    }
}
