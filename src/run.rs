//! Startup wiring: configuration, registry, chain client, notifier,
//! scheduler and command polling.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::Notify;

use crate::arguments;
use crate::chain::evm::EvmChain;
use crate::chain::ChainClient;
use crate::checkpoint::CheckpointStore;
use crate::claim::Orchestrator;
use crate::config::{resolve_secret, BotConfig};
use crate::constants::VERSION;
use crate::logger::{self, LogTag};
use crate::notifications::{Notification, Notifier, NullNotifier, TelegramNotifier};
use crate::registry::InstanceRegistry;
use crate::scheduler::Scheduler;
use crate::telegram::{run_polling, CommandContext};

/// Full bot lifecycle: load, wire, run until shutdown
pub async fn run() -> Result<()> {
    let config_path = arguments::config_path();
    logger::info(
        LogTag::System,
        &format!("loading configuration from {}", config_path),
    );

    let config = BotConfig::load(&config_path)?;
    config.validate()?;

    let registry = Arc::new(InstanceRegistry::from_config(&config)?);
    let chain: Arc<dyn ChainClient> =
        Arc::new(EvmChain::new(&config.chain).context("failed to build chain client")?);
    let orchestrator = Arc::new(Orchestrator::new(chain.clone(), &config.claims));
    let checkpoints = Arc::new(CheckpointStore::load(&config.schedule.checkpoint_path));

    let bot_token = resolve_secret(&config.telegram.bot_token);
    let telegram_ready =
        config.telegram.enabled && !bot_token.is_empty() && !config.telegram.chat_id.is_empty();

    let notifier: Arc<dyn Notifier> = if telegram_ready {
        Arc::new(
            TelegramNotifier::new(&bot_token, &config.telegram.chat_id).map_err(|e| anyhow!(e))?,
        )
    } else {
        logger::warning(
            LogTag::System,
            "telegram not configured, notifications go to the log only",
        );
        Arc::new(NullNotifier)
    };

    let shutdown = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.notify_waiters();
        })
        .context("failed to install signal handler")?;
    }

    if let Err(e) = notifier
        .notify(&Notification::bot_started(VERSION, registry.len()))
        .await
    {
        logger::warning(LogTag::System, &format!("startup notification failed: {}", e));
    }

    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        chain.clone(),
        notifier.clone(),
        orchestrator.clone(),
        checkpoints.clone(),
        config.schedule.clone(),
        config.alerts.clone(),
    )?);

    let mut handles = Vec::new();
    handles.push(tokio::spawn(scheduler.run(shutdown.clone())));

    if telegram_ready && config.telegram.commands_enabled {
        let chat_id: i64 = config
            .telegram
            .chat_id
            .parse()
            .with_context(|| format!("invalid telegram.chat_id '{}'", config.telegram.chat_id))?;
        let timezone: Tz = config
            .schedule
            .timezone
            .parse()
            .map_err(|_| anyhow!("unknown timezone '{}'", config.schedule.timezone))?;

        let ctx = Arc::new(CommandContext {
            registry: registry.clone(),
            chain: chain.clone(),
            orchestrator: orchestrator.clone(),
            checkpoints: checkpoints.clone(),
            schedule: config.schedule.clone(),
            timezone,
            started_at: Utc::now(),
        });

        handles.push(tokio::spawn(run_polling(
            Bot::new(bot_token),
            ChatId(chat_id),
            ctx,
            shutdown.clone(),
        )));
    }

    logger::info(
        LogTag::System,
        &format!("stakerbot v{} running with {} instances", VERSION, registry.len()),
    );

    for handle in handles {
        if let Err(e) = handle.await {
            logger::error(LogTag::System, &format!("task join error: {}", e));
        }
    }

    if let Err(e) = notifier
        .notify(&Notification::bot_stopped("graceful shutdown"))
        .await
    {
        logger::warning(LogTag::System, &format!("shutdown notification failed: {}", e));
    }

    logger::info(LogTag::System, "stakerbot stopped");
    Ok(())
}
