use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use tmon_core::{
    config::Config,
    service::{MonitorPorts, MonitorService},
};
use tmon_telegram::{
    build_bot,
    router::{self, AppState},
    TelegramOperator, TelegramPlatform,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tmon_core::logging::init("tmon")?;

    let cfg = Config::load()?;

    let monitor_bot = build_bot(&cfg.monitor_bot_token, &cfg.bot_api_url)?;
    let operator_bot = build_bot(&cfg.operator_bot_token, &cfg.bot_api_url)?;

    let platform = Arc::new(TelegramPlatform::new(
        monitor_bot.clone(),
        &cfg.monitor_bot_token,
        &cfg.bot_api_url,
    ));
    let operator = Arc::new(TelegramOperator::new(operator_bot.clone(), cfg.owner_id));

    let self_id = platform
        .identity()
        .await
        .context("monitoring bot identity check failed")?;
    tracing::info!(self_id = self_id.0, owner_id = cfg.owner_id, "monitoring identity ready");

    let ports = MonitorPorts {
        resolver: platform.clone(),
        directory: platform.clone(),
        actions: platform.clone(),
        notifier: operator.clone(),
        monitor_connection: platform.clone(),
        operator_connection: operator.clone(),
    };
    let service = Arc::new(MonitorService::new(cfg.service_settings(), ports, self_id));
    service.start();

    let cancel = CancellationToken::new();
    let monitor_task = tokio::spawn(router::run_monitor(
        monitor_bot,
        platform.registry(),
        service.clone(),
        cancel.child_token(),
    ));
    let state = Arc::new(AppState::new(service.clone(), cfg.owner_id, cfg.page_size));
    let operator_task = tokio::spawn(router::run_operator(
        operator_bot,
        state,
        cancel.child_token(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    cancel.cancel();
    for (name, task) in [("monitor", monitor_task), ("operator", operator_task)] {
        if let Err(e) = task.await {
            tracing::error!(dispatcher = name, error = %e, "dispatcher task failed");
        }
    }
    let cancelled = service.shutdown().await;
    tracing::info!(cancelled, "stopped");

    Ok(())
}
