//! Connection supervisor for the monitoring and operator sessions.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::ports::{OperatorNotifier, PlatformConnection};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

const AUTH_LOST_NOTICE: &str =
    "⚠️ The monitoring session has lost its authorization. Re-authorization may be required.";

/// What one supervision pass observed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub monitor_reconnected: bool,
    pub operator_reconnected: bool,
    pub monitor_authorized: Option<bool>,
    pub operator_notified: bool,
}

pub struct ConnectionSupervisor {
    monitor: Arc<dyn PlatformConnection>,
    operator: Arc<dyn PlatformConnection>,
    notifier: Arc<dyn OperatorNotifier>,
}

impl ConnectionSupervisor {
    pub fn new(
        monitor: Arc<dyn PlatformConnection>,
        operator: Arc<dyn PlatformConnection>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self {
            monitor,
            operator,
            notifier,
        }
    }

    /// One supervision pass. Never fails; problems are logged.
    ///
    /// Every pass that finds the monitoring session unauthorized warns the
    /// operator. Nothing else is done about it.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport {
            monitor_reconnected: ensure_connected(self.monitor.as_ref()).await,
            ..TickReport::default()
        };

        match self.monitor.is_authorized().await {
            Ok(true) => report.monitor_authorized = Some(true),
            Ok(false) => {
                tracing::error!(connection = self.monitor.name(), "session lost authorization");
                report.monitor_authorized = Some(false);
                match self.notifier.notify_operator(AUTH_LOST_NOTICE).await {
                    Ok(()) => report.operator_notified = true,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to notify operator about authorization loss")
                    }
                }
            }
            Err(e) => {
                tracing::warn!(connection = self.monitor.name(), error = %e, "authorization check failed");
            }
        }

        report.operator_reconnected = ensure_connected(self.operator.as_ref()).await;
        report
    }

    pub fn spawn(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(every);
            loop {
                tokio::select! {
                  _ = cancel.cancelled() => break,
                  _ = tick.tick() => {
                    let report = self.tick().await;
                    tracing::debug!(?report, "connection check done");
                  }
                }
            }
        })
    }
}

/// Reconnect `conn` if it reports disconnected. Returns whether a reconnect succeeded.
async fn ensure_connected(conn: &dyn PlatformConnection) -> bool {
    if conn.is_connected().await {
        return false;
    }
    tracing::warn!(connection = conn.name(), "not connected, reconnecting");
    match conn.reconnect().await {
        Ok(()) => {
            tracing::info!(connection = conn.name(), "reconnected");
            true
        }
        Err(e) => {
            tracing::error!(connection = conn.name(), error = %e, "reconnect failed");
            false
        }
    }
}
