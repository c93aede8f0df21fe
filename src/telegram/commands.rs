//! Command parsing and handlers.
//!
//! Replies are HTML-formatted strings. Read commands take a consistent
//! snapshot or a live read; claim/withdraw go through the orchestrator and
//! get its structured outcome back, including the `AlreadyInProgress`
//! rejection.

use chrono::{Datelike, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use super::CommandContext;
use crate::claim::{ClaimOutcome, TriggerKind, WithdrawOutcome};
use crate::constants::{self, NATIVE_SYMBOL, TOKEN_SYMBOL, VERSION, WRAPPED_NATIVE_SYMBOL};
use crate::logger::{self, LogTag};
use crate::notifications::{Notification, TelegramNotifier};
use crate::registry::ServiceInstance;
use crate::utils::{format_amount, format_duration, html_escape};

/// Commands accepted from the operator chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status(Option<String>),
    Balance(Option<String>),
    Claim(Option<String>),
    Withdraw(Option<String>),
    Slots,
    Jobs,
    Ip,
    Help,
}

impl Command {
    /// Parse a message text like `/claim trader-1` or `/status@MyBot`
    pub fn parse(text: &str) -> Option<Command> {
        let mut parts = text.trim().split_whitespace();
        let head = parts.next()?;
        let name = head.strip_prefix('/')?;
        // Group chats append the bot name: /status@stakerbot
        let name = name.split('@').next()?.to_ascii_lowercase();
        let arg = parts.next().map(|s| s.to_string());

        match name.as_str() {
            "status" | "staking_status" => Some(Command::Status(arg)),
            "balance" => Some(Command::Balance(arg)),
            "claim" => Some(Command::Claim(arg)),
            "withdraw" => Some(Command::Withdraw(arg)),
            "slots" => Some(Command::Slots),
            "jobs" => Some(Command::Jobs),
            "ip" => Some(Command::Ip),
            "help" | "start" => Some(Command::Help),
            _ => None,
        }
    }
}

/// Dispatch one parsed command to its handler
pub async fn handle_command(ctx: &CommandContext, command: Command) -> String {
    match command {
        Command::Status(target) => handle_status(ctx, target).await,
        Command::Balance(target) => handle_balance(ctx, target).await,
        Command::Claim(target) => handle_claim(ctx, target).await,
        Command::Withdraw(target) => handle_withdraw(ctx, target).await,
        Command::Slots => handle_slots(ctx).await,
        Command::Jobs => handle_jobs(ctx).await,
        Command::Ip => handle_ip().await,
        Command::Help => handle_help(),
    }
}

/// Resolve a command target to instances: a named instance or all of them
fn targets(
    ctx: &CommandContext,
    target: Option<String>,
) -> Result<Vec<Arc<ServiceInstance>>, String> {
    match target {
        Some(id) => match ctx.registry.get(&id) {
            Some(instance) => Ok(vec![instance]),
            None => Err(format!("Unknown instance '{}'", html_escape(&id))),
        },
        None => Ok(ctx.registry.instances().to_vec()),
    }
}

async fn handle_status(ctx: &CommandContext, target: Option<String>) -> String {
    let instances = match targets(ctx, target) {
        Ok(instances) => instances,
        Err(reply) => return reply,
    };

    let mut blocks = Vec::new();
    let mut total_rewards = 0.0;
    let mut safe_token_total = 0.0;
    let mut master_token_total = 0.0;
    let mut seen_master_safes: HashSet<String> = HashSet::new();

    for instance in &instances {
        let spec = instance.spec();
        let status = match ctx
            .chain
            .read_staking_status(&spec.staking_contract, spec.service_id, &spec.wallets.safe)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                blocks.push(format!(
                    "[{}] status unavailable: <code>{}</code>",
                    html_escape(instance.id()),
                    html_escape(&e.to_string())
                ));
                continue;
            }
        };

        total_rewards += status.pending_rewards;
        match ctx.chain.read_balances(instance.wallets()).await {
            Ok(balances) => {
                safe_token_total += balances.safe_token;
                if seen_master_safes.insert(spec.wallets.master_safe.clone()) {
                    master_token_total += balances.master_safe_token;
                }
            }
            Err(e) => logger::debug(
                LogTag::Telegram,
                &format!("[{}] balance read failed during status: {}", instance.id(), e),
            ),
        }

        let staked = if status.is_staked { "" } else { " (not staked)" };
        blocks.push(format!(
            "[{}] {} {} pending{} [{}/{}]\nStaking program: {}\nNext epoch: {}",
            html_escape(instance.id()),
            format_amount(status.pending_rewards),
            TOKEN_SYMBOL,
            staked,
            status.mech_requests_this_epoch,
            status.required_requests,
            html_escape(&status.program_name),
            status
                .epoch_end
                .with_timezone(&ctx.timezone)
                .format("%Y-%m-%d %H:%M:%S %Z"),
        ));
    }

    // Fleet-wide total: pending rewards plus token held in the safes,
    // valued in USD when the price lookup cooperates.
    let combined = total_rewards + safe_token_total + master_token_total;
    let mut summary = format!("Total rewards = {} {}", format_amount(combined), TOKEN_SYMBOL);
    let mut breakdown = Vec::new();
    if total_rewards > 0.0 {
        breakdown.push(format!("{} pending", format_amount(total_rewards)));
    }
    if safe_token_total > 0.0 {
        breakdown.push(format!("{} in service safes", format_amount(safe_token_total)));
    }
    if master_token_total > 0.0 {
        breakdown.push(format!("{} in master safes", format_amount(master_token_total)));
    }
    if !breakdown.is_empty() {
        summary.push_str(&format!(" ({})", breakdown.join(" + ")));
    }
    if let Some(price) = ctx.chain.read_price().await {
        summary.push_str(&format!(" [${}]", format_amount(combined * price)));
    }
    blocks.push(summary);

    blocks.push(format!(
        "Uptime: {}",
        format_duration((Utc::now() - ctx.started_at).num_seconds().max(0) as u64)
    ));

    blocks.join("\n\n")
}

async fn handle_balance(ctx: &CommandContext, target: Option<String>) -> String {
    let instances = match targets(ctx, target) {
        Ok(instances) => instances,
        Err(reply) => return reply,
    };

    let mut blocks = Vec::new();
    for instance in &instances {
        let wallets = instance.wallets();
        match ctx.chain.read_balances(wallets).await {
            Ok(b) => blocks.push(format!(
                "[{}]\n\
                 <a href=\"{}\">Agent EOA</a> = {} {}\n\
                 <a href=\"{}\">Service Safe</a> = {} {}  {} {}  {} {}\n\
                 <a href=\"{}\">Operator EOA</a> = {} {}\n\
                 <a href=\"{}\">Master Safe</a> = {} {}  {} {}",
                html_escape(instance.id()),
                constants::address_url(&wallets.agent),
                format_amount(b.agent_native),
                NATIVE_SYMBOL,
                constants::address_url(&wallets.safe),
                format_amount(b.safe_native),
                NATIVE_SYMBOL,
                format_amount(b.safe_wrapped_native),
                WRAPPED_NATIVE_SYMBOL,
                format_amount(b.safe_token),
                TOKEN_SYMBOL,
                constants::address_url(&wallets.operator),
                format_amount(b.operator_native),
                NATIVE_SYMBOL,
                constants::address_url(&wallets.master_safe),
                format_amount(b.master_safe_native),
                NATIVE_SYMBOL,
                format_amount(b.master_safe_token),
                TOKEN_SYMBOL,
            )),
            Err(e) => blocks.push(format!(
                "[{}] balances unavailable: <code>{}</code>",
                html_escape(instance.id()),
                html_escape(&e.to_string())
            )),
        }
    }

    blocks.join("\n\n")
}

async fn handle_claim(ctx: &CommandContext, target: Option<String>) -> String {
    let instances = match targets(ctx, target) {
        Ok(instances) => instances,
        Err(reply) => return reply,
    };

    let mut blocks = Vec::new();
    for instance in &instances {
        if !instance.spec().manual_claim {
            blocks.push(format!(
                "[{}] Manual claim is disabled",
                html_escape(instance.id())
            ));
            continue;
        }

        let outcome = ctx.orchestrator.claim(instance, TriggerKind::Manual).await;
        blocks.push(match outcome {
            ClaimOutcome::Claimed { amount, tx_hash } => TelegramNotifier::format_notification(
                &Notification::claim_completed(instance.id(), TriggerKind::Manual, amount, Some(tx_hash)),
            ),
            ClaimOutcome::NothingToClaim => format!(
                "[{}] No rewards to claim",
                html_escape(instance.id())
            ),
            ClaimOutcome::AlreadyInProgress => format!(
                "[{}] A claim or withdrawal is already in progress",
                html_escape(instance.id())
            ),
            ClaimOutcome::Failed { stage, error } => TelegramNotifier::format_notification(
                &Notification::claim_failed(
                    instance.id(),
                    TriggerKind::Manual,
                    stage.to_string(),
                    error.to_string(),
                ),
            ),
        });
    }

    blocks.join("\n\n")
}

async fn handle_withdraw(ctx: &CommandContext, target: Option<String>) -> String {
    let Some(destination) = ctx.orchestrator.withdrawal_address().map(|s| s.to_string()) else {
        return "Withdrawal address is not configured".to_string();
    };

    let instances = match targets(ctx, target) {
        Ok(instances) => instances,
        Err(reply) => return reply,
    };

    let mut blocks = Vec::new();
    for instance in &instances {
        let outcome = ctx.orchestrator.withdraw(instance, TriggerKind::Manual).await;
        blocks.push(match outcome {
            WithdrawOutcome::Withdrawn { transfers } => TelegramNotifier::format_notification(
                &Notification::withdraw_completed(
                    instance.id(),
                    TriggerKind::Manual,
                    transfers,
                    &destination,
                ),
            ),
            WithdrawOutcome::NothingToWithdraw => format!(
                "[{}] No rewards to withdraw",
                html_escape(instance.id())
            ),
            WithdrawOutcome::AlreadyInProgress => format!(
                "[{}] A claim or withdrawal is already in progress",
                html_escape(instance.id())
            ),
            WithdrawOutcome::NotConfigured => "Withdrawal address is not configured".to_string(),
            WithdrawOutcome::Failed {
                stage,
                error,
                completed,
            } => TelegramNotifier::format_notification(&Notification::withdraw_failed(
                instance.id(),
                TriggerKind::Manual,
                stage.to_string(),
                error.to_string(),
                completed,
            )),
        });
    }

    blocks.join("\n\n")
}

async fn handle_slots(ctx: &CommandContext) -> String {
    let mut lines = Vec::new();
    for program in constants::STAKING_PROGRAMS {
        match ctx.chain.read_slot_availability(program.address).await {
            Ok(slots) => lines.push(format!(
                "[{}] {} available slots",
                program.name, slots.free_slots
            )),
            Err(e) => lines.push(format!(
                "[{}] unavailable: <code>{}</code>",
                program.name,
                html_escape(&e.to_string())
            )),
        }
    }
    lines.join("\n")
}

async fn handle_jobs(ctx: &CommandContext) -> String {
    let now = Utc::now();
    let mut lines = Vec::new();

    match ctx.checkpoints.last_poll_at() {
        Some(last) => {
            let next = last + chrono::Duration::seconds(ctx.schedule.poll_interval_secs as i64);
            lines.push(format!(
                "• poll cycle: last {}, next ~{}",
                last.with_timezone(&ctx.timezone).format("%Y-%m-%d %H:%M:%S %Z"),
                next.with_timezone(&ctx.timezone).format("%H:%M:%S %Z"),
            ));
        }
        None => lines.push("• poll cycle: not yet run".to_string()),
    }

    for instance in ctx.registry.instances() {
        if !instance.spec().autoclaim {
            lines.push(format!("• autoclaim [{}]: disabled", html_escape(instance.id())));
            continue;
        }

        let now_local = now.with_timezone(&ctx.timezone);
        let current_period = format!("{:04}-{:02}", now_local.year(), now_local.month());
        let last_period = ctx.checkpoints.autoclaim_period(instance.id());

        let line = if last_period.as_deref() == Some(current_period.as_str()) {
            format!(
                "• autoclaim [{}]: done for {}, next in the following month",
                html_escape(instance.id()),
                current_period
            )
        } else {
            let slot = ctx
                .timezone
                .with_ymd_and_hms(
                    now_local.year(),
                    now_local.month(),
                    ctx.schedule.autoclaim_day,
                    ctx.schedule.autoclaim_hour,
                    0,
                    0,
                )
                .single();
            match slot {
                Some(slot) if now_local < slot => format!(
                    "• autoclaim [{}]: next at {}",
                    html_escape(instance.id()),
                    slot.format("%Y-%m-%d %H:%M %Z")
                ),
                _ => format!(
                    "• autoclaim [{}]: due on the next poll tick",
                    html_escape(instance.id())
                ),
            }
        };
        lines.push(line);
    }

    lines.join("\n")
}

async fn handle_ip() -> String {
    let ip = match reqwest::get("https://api.ipify.org").await {
        Ok(response) => match response.text().await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                logger::warning(LogTag::Telegram, &format!("failed to read public IP: {}", e));
                "Unavailable".to_string()
            }
        },
        Err(e) => {
            logger::warning(LogTag::Telegram, &format!("failed to get public IP: {}", e));
            "Unavailable".to_string()
        }
    };
    format!("Public IP address: {}", ip)
}

fn handle_help() -> String {
    format!(
        "<b>stakerbot v{}</b>\n\n\
         /status [instance] — staking status and reward totals\n\
         /balance [instance] — wallet balances\n\
         /claim [instance] — claim staking rewards\n\
         /withdraw [instance] — withdraw rewards to the configured address\n\
         /slots — available staking slots\n\
         /jobs — scheduled jobs\n\
         /ip — server public IP",
        VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::{staking_status, MockChain};
    use crate::checkpoint::CheckpointStore;
    use crate::claim::Orchestrator;
    use crate::config::{ClaimSettings, ScheduleSettings};
    use crate::registry::testing::test_registry;
    use tempfile::tempdir;

    fn context(chain: Arc<MockChain>, claims: ClaimSettings) -> (CommandContext, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ctx = CommandContext {
            registry: Arc::new(test_registry(2)),
            chain: chain.clone(),
            orchestrator: Arc::new(Orchestrator::new(chain, &claims)),
            checkpoints: Arc::new(CheckpointStore::load(dir.path().join("checkpoints.json"))),
            schedule: ScheduleSettings::default(),
            timezone: "UTC".parse().unwrap(),
            started_at: Utc::now(),
        };
        (ctx, dir)
    }

    fn fast_claims() -> ClaimSettings {
        ClaimSettings {
            retry_base_delay_ms: 1,
            confirm_timeout_secs: 1,
            withdrawal_address: Some("0x000000000000000000000000000000000000dEaD".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn command_parsing() {
        assert_eq!(Command::parse("/status"), Some(Command::Status(None)));
        assert_eq!(
            Command::parse("/status trader-1"),
            Some(Command::Status(Some("trader-1".to_string())))
        );
        assert_eq!(
            Command::parse("/claim@stakerbot trader-1"),
            Some(Command::Claim(Some("trader-1".to_string())))
        );
        assert_eq!(Command::parse("/SLOTS"), Some(Command::Slots));
        assert_eq!(Command::parse("/help"), Some(Command::Help));
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("/unknown"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[tokio::test]
    async fn unknown_instance_is_an_error_reply() {
        let (ctx, _dir) = context(Arc::new(MockChain::new()), fast_claims());
        let reply = handle_command(&ctx, Command::Claim(Some("nope".to_string()))).await;
        assert!(reply.contains("Unknown instance"));
    }

    #[tokio::test]
    async fn claim_reports_per_instance() {
        let chain = Arc::new(MockChain::new());
        chain.push_staking(Ok(staking_status(3.0)));
        chain.push_staking(Ok(staking_status(0.0)));
        let (ctx, _dir) = context(chain, fast_claims());

        let reply = handle_command(&ctx, Command::Claim(None)).await;
        assert!(reply.contains("instance-0"));
        assert!(reply.contains("instance-1"));
        assert!(reply.contains("No rewards to claim"));
        assert!(reply.contains("Claim completed"));
    }

    #[tokio::test]
    async fn claim_while_in_flight_is_rejected() {
        let chain = Arc::new(MockChain::new());
        let (ctx, _dir) = context(chain, fast_claims());
        let instance = ctx.registry.get("instance-0").unwrap();
        let _guard = instance.try_begin_claim().unwrap();

        let reply = handle_command(&ctx, Command::Claim(Some("instance-0".to_string()))).await;
        assert!(reply.contains("already in progress"));
    }

    #[tokio::test]
    async fn withdraw_without_config_is_refused() {
        let chain = Arc::new(MockChain::new());
        let mut claims = fast_claims();
        claims.withdrawal_address = None;
        let (ctx, _dir) = context(chain, claims);

        let reply = handle_command(&ctx, Command::Withdraw(None)).await;
        assert_eq!(reply, "Withdrawal address is not configured");
    }

    #[tokio::test]
    async fn status_aggregates_rewards_and_price() {
        let chain = Arc::new(MockChain::new());
        chain.push_staking(Ok(staking_status(2.0)));
        chain.push_staking(Ok(staking_status(3.0)));
        chain.set_price(Some(2.0));
        let (ctx, _dir) = context(chain, fast_claims());

        let reply = handle_command(&ctx, Command::Status(None)).await;
        assert!(reply.contains("Total rewards = 5 OLAS"));
        assert!(reply.contains("[$10]"));
        assert!(reply.contains("Staking program"));
    }

    #[tokio::test]
    async fn status_isolates_a_failing_instance() {
        let chain = Arc::new(MockChain::new());
        chain.push_staking(Err(crate::errors::ChainError::Unavailable(
            "rpc down".to_string(),
        )));
        chain.push_staking(Ok(staking_status(1.0)));
        let (ctx, _dir) = context(chain, fast_claims());

        let reply = handle_command(&ctx, Command::Status(None)).await;
        assert!(reply.contains("status unavailable"));
        assert!(reply.contains("1 OLAS pending"));
    }

    #[tokio::test]
    async fn jobs_lists_autoclaim_state() {
        let chain = Arc::new(MockChain::new());
        let (ctx, _dir) = context(chain, fast_claims());
        let now_local = Utc::now().with_timezone(&ctx.timezone);
        ctx.checkpoints
            .record_autoclaim(
                "instance-0",
                &format!("{:04}-{:02}", now_local.year(), now_local.month()),
            )
            .unwrap();

        let reply = handle_command(&ctx, Command::Jobs).await;
        assert!(reply.contains("poll cycle: not yet run"));
        assert!(reply.contains("autoclaim [instance-0]: done for"));
        assert!(reply.contains("autoclaim [instance-1]"));
    }
}
