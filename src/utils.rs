//! Small shared helpers: shutdown-aware delays and display formatting.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Sleep for `delay` unless shutdown is signalled first.
///
/// Returns `true` if shutdown was requested, `false` if the delay elapsed.
pub async fn check_shutdown_or_delay(shutdown: &Arc<Notify>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.notified() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Shorten an address for display: `0x1234…abcd`
pub fn short_address(address: &str) -> String {
    if address.len() <= 12 {
        return address.to_string();
    }
    format!("{}…{}", &address[..6], &address[address.len() - 4..])
}

/// Format a token amount without trailing zeros (`1.5`, not `1.5000`)
pub fn format_amount(value: f64) -> String {
    let formatted = format!("{:.4}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Format a duration in seconds as `2d 3h 4m` / `3h 4m` / `4m 5s`
pub fn format_duration(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}

/// Escape text for Telegram HTML parse mode
pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_address_truncates() {
        assert_eq!(
            short_address("0xcE11e14225575945b8E6Dc0D4F2dD4C570f79d9f"),
            "0xcE11…9d9f"
        );
        assert_eq!(short_address("0xabc"), "0xabc");
    }

    #[test]
    fn amount_formatting_trims_zeros() {
        assert_eq!(format_amount(1.5), "1.5");
        assert_eq!(format_amount(0.0), "0");
        assert_eq!(format_amount(12.3456), "12.3456");
        assert_eq!(format_amount(3.0), "3");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(45), "0m 45s");
        assert_eq!(format_duration(3_700), "1h 1m");
        assert_eq!(format_duration(90_061), "1d 1h 1m");
    }

    #[test]
    fn html_escaping() {
        assert_eq!(html_escape("a < b & c > d"), "a &lt; b &amp; c &gt; d");
    }

    #[tokio::test]
    async fn delay_returns_true_on_shutdown() {
        let shutdown = Arc::new(Notify::new());
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                check_shutdown_or_delay(&shutdown, Duration::from_secs(30)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.notify_waiters();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn delay_returns_false_when_elapsed() {
        let shutdown = Arc::new(Notify::new());
        assert!(!check_shutdown_or_delay(&shutdown, Duration::from_millis(5)).await);
    }
}
