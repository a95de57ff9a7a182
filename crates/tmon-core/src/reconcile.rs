//! Watch-set reconciliation: drop chats that no longer resolve.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Local};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::{ports::OperatorNotifier, resolver::EntityCache, store::MonitoredSetStore};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(12 * 3600);
const NOTICE_LIST_LIMIT: usize = 10;

pub struct Reconciler {
    cache: Arc<EntityCache>,
    store: Arc<MonitoredSetStore>,
    notifier: Arc<dyn OperatorNotifier>,
    last_run: Mutex<Option<DateTime<Local>>>,
}

impl Reconciler {
    pub fn new(
        cache: Arc<EntityCache>,
        store: Arc<MonitoredSetStore>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        Self {
            cache,
            store,
            notifier,
            last_run: Mutex::new(None),
        }
    }

    /// Wall-clock time the last sweep finished.
    pub fn last_run(&self) -> Option<DateTime<Local>> {
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resolve every watched chat and remove the ones that fail.
    ///
    /// Removal happens after the whole sweep, keyed by the stored spelling, so
    /// legacy short-form entries are dropped too. Returns the removed keys.
    pub async fn validate_all(&self) -> Vec<String> {
        let watched = self.store.keys();
        let mut unreachable = Vec::new();

        for chat_id in &watched {
            if let Err(e) = self.cache.resolve(chat_id).await {
                tracing::warn!(chat_id = %chat_id, error = %e, "watched chat unreachable, will be removed");
                unreachable.push(chat_id.clone());
            }
        }
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(Local::now());

        if unreachable.is_empty() {
            tracing::info!(checked = watched.len(), "all watched chats reachable");
            return Vec::new();
        }

        for chat_id in &unreachable {
            self.cache.invalidate(chat_id).await;
        }
        let removed = self.store.remove_keys(&unreachable);
        tracing::info!(removed = removed.len(), "removed unreachable chats from monitoring");

        if !removed.is_empty() {
            let text = removal_notice(&removed);
            if let Err(e) = self.notifier.notify_operator(&text).await {
                tracing::error!(error = %e, "failed to notify operator about unreachable chats");
            }
        }

        removed
    }

    /// Sweep now, then every `every`, until `cancel` fires.
    pub fn spawn_periodic(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            // The first tick completes immediately: that is the startup sweep.
            let mut tick = interval(every);
            loop {
                tokio::select! {
                  _ = cancel.cancelled() => break,
                  _ = tick.tick() => {
                    tracing::info!("starting watch-set availability check");
                    tokio::select! {
                      _ = cancel.cancelled() => break,
                      removed = self.validate_all() => {
                        tracing::info!(removed = removed.len(), "watch-set availability check finished");
                      }
                    }
                  }
                }
            }
        })
    }
}

/// Operator message listing at most the first ten removed ids.
pub fn removal_notice(removed: &[String]) -> String {
    let mut msg = format!(
        "⚠️ {} chat(s) were removed from monitoring because they are no longer reachable:\n",
        removed.len()
    );
    for id in removed.iter().take(NOTICE_LIST_LIMIT) {
        msg.push_str(&format!("- {id}\n"));
    }
    if removed.len() > NOTICE_LIST_LIMIT {
        msg.push_str(&format!(
            "...and {} more",
            removed.len() - NOTICE_LIST_LIMIT
        ));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::SettingsFiles,
        testing::{temp_settings_path, FakeNotifier, FakeResolver},
    };

    fn setup(
        tag: &str,
        watched: &[&str],
        reachable: &[i64],
    ) -> (Reconciler, Arc<MonitoredSetStore>, Arc<FakeNotifier>) {
        let store = Arc::new(MonitoredSetStore::open(SettingsFiles::new(
            temp_settings_path(tag),
        )));
        for id in watched {
            store.add(id);
        }
        let resolver = Arc::new(FakeResolver::with_chats(reachable));
        let notifier = Arc::new(FakeNotifier::default());
        let rec = Reconciler::new(
            Arc::new(EntityCache::new(resolver)),
            store.clone(),
            notifier.clone(),
        );
        (rec, store, notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn removes_only_the_failing_chats() {
        let (rec, store, notifier) = setup(
            "rec-five",
            &["-1001", "-1002", "-1003", "-1004", "-1005"],
            &[-1001, -1003, -1005],
        );

        let mut removed = rec.validate_all().await;
        removed.sort();

        assert_eq!(removed, vec!["-1002".to_string(), "-1004".to_string()]);
        assert_eq!(store.len(), 3);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_unreachable_chat_scenario() {
        let (rec, store, notifier) = setup("rec-single", &["-100123"], &[]);

        let removed = rec.validate_all().await;

        assert_eq!(removed, vec!["-100123".to_string()]);
        assert!(store.snapshot().is_empty());
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("-100123"));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_removed_means_no_notification() {
        let (rec, store, notifier) = setup("rec-clean", &["-1001"], &[-1001]);
        assert!(rec.last_run().is_none());
        assert!(rec.validate_all().await.is_empty());
        assert!(rec.last_run().is_some());
        assert_eq!(store.len(), 1);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn legacy_short_keys_are_removed_by_stored_spelling() {
        let path = temp_settings_path("rec-legacy");
        std::fs::write(&path, r#"{"-777":true}"#).unwrap();
        let store = Arc::new(MonitoredSetStore::open(SettingsFiles::new(&path)));
        let rec = Reconciler::new(
            Arc::new(EntityCache::new(Arc::new(FakeResolver::default()))),
            store.clone(),
            Arc::new(FakeNotifier::default()),
        );

        assert_eq!(rec.validate_all().await, vec!["-777".to_string()]);
        assert!(store.is_empty());
    }

    #[test]
    fn notice_caps_the_list_at_ten() {
        let ids: Vec<String> = (0..13).map(|i| format!("-100{i}")).collect();
        let msg = removal_notice(&ids);
        assert!(msg.starts_with("⚠️ 13 chat(s)"));
        assert_eq!(msg.lines().filter(|l| l.starts_with("- ")).count(), 10);
        assert!(msg.contains("-1009"));
        assert!(!msg.contains("-10010"));
        assert!(msg.ends_with("...and 3 more"));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_loop_sweeps_at_startup_and_stops_on_cancel() {
        let (rec, store, _notifier) = setup("rec-loop", &["-1001"], &[]);
        let cancel = CancellationToken::new();
        let handle = Arc::new(rec).spawn_periodic(DEFAULT_INTERVAL, cancel.clone());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_loop_sweeps_again_after_the_interval() {
        let store = Arc::new(MonitoredSetStore::open(SettingsFiles::new(
            temp_settings_path("rec-repeat"),
        )));
        store.add("-1001");
        store.add("-1002");
        let resolver = Arc::new(FakeResolver::with_chats(&[-1001, -1002]));
        let notifier = Arc::new(FakeNotifier::default());
        let rec = Arc::new(Reconciler::new(
            Arc::new(EntityCache::new(resolver.clone())),
            store.clone(),
            notifier.clone(),
        ));
        let cancel = CancellationToken::new();
        let handle = rec.clone().spawn_periodic(DEFAULT_INTERVAL, cancel.clone());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.len(), 2);
        let first_run = rec.last_run();
        assert!(first_run.is_some());

        resolver.remove(-1002);
        tokio::time::sleep(DEFAULT_INTERVAL - Duration::from_secs(100)).await;
        assert_eq!(store.len(), 2);
        assert!(notifier.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(1000)).await;
        assert!(store.is_watched("-1001"));
        assert!(!store.is_watched("-1002"));
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("-1002"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
