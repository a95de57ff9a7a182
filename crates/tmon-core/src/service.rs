//! `MonitorService`: the single owner of the watch set, the resolution cache and
//! the reaction scheduler.
//!
//! Inbound messages enter through `on_message`; the operator menu talks to
//! `toggle_watch`, `list_watched`, `list_chats` and `run_reconciliation_now`.
//! `start` spawns the background loops and `shutdown` stops them.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Local};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{InboundMessage, ListedChat, ToggleOutcome, UserId, WatchedChat},
    errors::Error,
    ids::{normalize, to_bot_api_id},
    ports::{
        ChatDirectory, ChatResolver, MonitorActions, OperatorNotifier, PlatformConnection,
    },
    reconcile::{self, Reconciler},
    resolver::{self, EntityCache},
    scheduler::{self, ReactionScheduler, SchedulerSettings},
    store::{MonitoredSetStore, SettingsFiles},
    supervisor::{self, ConnectionSupervisor},
    Result,
};

#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub settings_file: PathBuf,
    pub scheduler: SchedulerSettings,
    pub cache_ttl: Duration,
    pub resolve_retries: u32,
    pub reconcile_interval: Duration,
    pub supervisor_interval: Duration,
    pub housekeeping_interval: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            settings_file: PathBuf::from("monitor_settings.json"),
            scheduler: SchedulerSettings::default(),
            cache_ttl: resolver::DEFAULT_TTL,
            resolve_retries: resolver::DEFAULT_MAX_RETRIES,
            reconcile_interval: reconcile::DEFAULT_INTERVAL,
            supervisor_interval: supervisor::DEFAULT_INTERVAL,
            housekeeping_interval: scheduler::DEFAULT_HOUSEKEEPING_INTERVAL,
        }
    }
}

/// Platform collaborators the service is wired to.
#[derive(Clone)]
pub struct MonitorPorts {
    pub resolver: Arc<dyn ChatResolver>,
    pub directory: Arc<dyn ChatDirectory>,
    pub actions: Arc<dyn MonitorActions>,
    pub notifier: Arc<dyn OperatorNotifier>,
    pub monitor_connection: Arc<dyn PlatformConnection>,
    pub operator_connection: Arc<dyn PlatformConnection>,
}

/// What `on_message` did with an inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundDisposition {
    NotWatched,
    OwnMessage,
    /// Watched, but the chat did not resolve; nothing was scheduled.
    Unresolvable,
    Scheduled,
    Duplicate,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct ServiceStatus {
    pub watched: usize,
    pub pending_reactions: usize,
    pub processed_messages: usize,
    pub cached_chats: usize,
    pub last_reconciled: Option<DateTime<Local>>,
}

pub struct MonitorService {
    settings: ServiceSettings,
    self_id: UserId,
    store: Arc<MonitoredSetStore>,
    cache: Arc<EntityCache>,
    scheduler: ReactionScheduler,
    reconciler: Arc<Reconciler>,
    supervisor: Arc<ConnectionSupervisor>,
    directory: Arc<dyn ChatDirectory>,
    actions: Arc<dyn MonitorActions>,
    cancel: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorService {
    /// Build the service and load the watch set. `self_id` is the monitoring
    /// identity; its own messages are never acted on.
    pub fn new(settings: ServiceSettings, ports: MonitorPorts, self_id: UserId) -> Self {
        let store = Arc::new(MonitoredSetStore::open(SettingsFiles::new(
            settings.settings_file.clone(),
        )));
        let cache = Arc::new(EntityCache::with_settings(
            ports.resolver.clone(),
            settings.cache_ttl,
            settings.resolve_retries,
        ));
        let scheduler = ReactionScheduler::new(
            settings.scheduler.clone(),
            cache.clone(),
            store.clone(),
            ports.actions.clone(),
            ports.notifier.clone(),
        );
        let reconciler = Arc::new(Reconciler::new(
            cache.clone(),
            store.clone(),
            ports.notifier.clone(),
        ));
        let supervisor = Arc::new(ConnectionSupervisor::new(
            ports.monitor_connection.clone(),
            ports.operator_connection.clone(),
            ports.notifier.clone(),
        ));

        Self {
            settings,
            self_id,
            store,
            cache,
            scheduler,
            reconciler,
            supervisor,
            directory: ports.directory,
            actions: ports.actions,
            cancel: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Spawn reconciliation (sweeping immediately), supervision and claim housekeeping.
    pub fn start(&self) {
        let mut loops = self.loops();
        if !loops.is_empty() {
            tracing::warn!("monitor service already started");
            return;
        }

        loops.push(
            self.reconciler
                .clone()
                .spawn_periodic(self.settings.reconcile_interval, self.cancel.child_token()),
        );
        loops.push(
            self.supervisor
                .clone()
                .spawn(self.settings.supervisor_interval, self.cancel.child_token()),
        );
        loops.push(
            self.scheduler
                .spawn_housekeeping(self.settings.housekeeping_interval),
        );

        tracing::info!(
            watched = self.store.len(),
            reconcile_every_secs = self.settings.reconcile_interval.as_secs(),
            supervise_every_secs = self.settings.supervisor_interval.as_secs(),
            "monitor service started"
        );
    }

    /// Stop every loop and cancel all pending reactions. Returns the number of
    /// reactions cancelled.
    pub async fn shutdown(&self) -> usize {
        self.cancel.cancel();
        let cancelled = self.scheduler.shutdown();

        let handles: Vec<JoinHandle<()>> = self.loops().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "background loop ended abnormally");
            }
        }

        tracing::info!(cancelled, "monitor service stopped");
        cancelled
    }

    /// Handle one inbound message seen by the monitoring identity.
    ///
    /// Watched, not self-authored messages get an immediate read-ack and a
    /// delayed reaction. Acknowledgement failures are logged only.
    pub async fn on_message(&self, msg: &InboundMessage) -> InboundDisposition {
        if self.cancel.is_cancelled() {
            return InboundDisposition::Stopped;
        }

        let Some(matched) = self.store.matched_key(&msg.chat_id) else {
            tracing::debug!(chat_id = %msg.chat_id, "chat not watched");
            return InboundDisposition::NotWatched;
        };
        if msg.sender_id == Some(self.self_id) {
            tracing::debug!(chat_id = %msg.chat_id, message_id = msg.message_id.0, "skipping own message");
            return InboundDisposition::OwnMessage;
        }
        if self.scheduler.is_claimed(&msg.chat_id, msg.message_id) {
            tracing::info!(chat_id = %msg.chat_id, message_id = msg.message_id.0, "message already processed");
            return InboundDisposition::Duplicate;
        }

        tracing::info!(chat_id = %msg.chat_id, matched = %matched, message_id = msg.message_id.0, "message in watched chat");

        let chat = match self.cache.resolve(&msg.chat_id).await {
            Ok(chat) => chat,
            Err(e) => {
                tracing::error!(chat_id = %msg.chat_id, error = %e, "could not resolve watched chat");
                return InboundDisposition::Unresolvable;
            }
        };

        match self.actions.acknowledge_read(&chat, msg.message_id).await {
            Ok(()) => tracing::info!(message_id = msg.message_id.0, "message marked as read"),
            Err(e) => {
                tracing::error!(message_id = msg.message_id.0, error = %e, "failed to mark message as read")
            }
        }

        if self.scheduler.on_eligible_message(&msg.chat_id, msg.message_id) {
            InboundDisposition::Scheduled
        } else if self.cancel.is_cancelled() {
            InboundDisposition::Stopped
        } else {
            InboundDisposition::Duplicate
        }
    }

    /// Flip the watch state of `chat_id`.
    ///
    /// Turning a chat off removes whichever stored key matched it, so legacy
    /// short-form entries can be switched off too. Turning it on requires the
    /// chat to resolve; the resolved id is stored in canonical form.
    pub async fn toggle_watch(&self, chat_id: &str) -> Result<ToggleOutcome> {
        if to_bot_api_id(chat_id).is_none() {
            return Err(Error::Resolve(format!("invalid chat id: {chat_id}")));
        }

        if let Some(stored) = self.store.matched_key(chat_id) {
            self.store.remove_key(&stored);
            let title = match self.cache.resolve_with_retries(chat_id, 1).await {
                Ok(chat) => chat.display_title(),
                Err(_) => format!("Chat {chat_id}"),
            };
            tracing::info!(chat_id = %stored, "watch disabled");
            return Ok(ToggleOutcome {
                chat_id: stored,
                now_watching: false,
                title,
            });
        }

        let chat = self.cache.resolve(chat_id).await?;
        let canonical = normalize(&chat.id.to_string());
        self.store.add(&canonical);
        tracing::info!(chat_id = %canonical, requested = chat_id, "watch enabled");

        Ok(ToggleOutcome {
            chat_id: canonical,
            now_watching: true,
            title: chat.display_title(),
        })
    }

    /// Every watched chat with its title and whether it currently resolves.
    ///
    /// Each chat gets a single resolution round, so an unreachable chat costs
    /// no backoff here.
    pub async fn list_watched(&self) -> Vec<WatchedChat> {
        let mut out = Vec::new();
        for id in self.store.keys() {
            let row = match self.cache.resolve_with_retries(&id, 1).await {
                Ok(chat) => WatchedChat {
                    title: chat.display_title(),
                    id,
                    reachable: true,
                },
                Err(e) => {
                    tracing::warn!(chat_id = %id, error = %e, "watched chat not reachable");
                    WatchedChat {
                        title: format!("Chat {id}"),
                        id,
                        reachable: false,
                    }
                }
            };
            out.push(row);
        }
        out
    }

    /// Channels and groups visible to the monitoring identity, filtered by a
    /// case-insensitive title or id match when `search` is given.
    pub async fn list_chats(&self, search: Option<&str>) -> Result<Vec<ListedChat>> {
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let chats = self.directory.list_channels_and_groups().await?;
        Ok(chats
            .into_iter()
            .filter(|c| match &needle {
                Some(n) => c.title.to_lowercase().contains(n) || c.id.to_string().contains(n),
                None => true,
            })
            .map(|c| ListedChat {
                watched: self.store.is_watched(&c.id.to_string()),
                id: c.id,
                title: c.title,
            })
            .collect())
    }

    /// Sweep the watch set now. Returns how many chats were removed.
    pub async fn run_reconciliation_now(&self) -> usize {
        self.reconciler.validate_all().await.len()
    }

    pub fn is_watched(&self, chat_id: &str) -> bool {
        self.store.is_watched(chat_id)
    }

    pub async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            watched: self.store.len(),
            pending_reactions: self.scheduler.pending_len(),
            processed_messages: self.scheduler.processed_len(),
            cached_chats: self.cache.len().await,
            last_reconciled: self.reconciler.last_run(),
        }
    }

    pub fn reaction_delay(&self) -> Duration {
        self.settings.scheduler.delay
    }

    pub fn reaction_emoji(&self) -> &str {
        &self.settings.scheduler.emoji
    }

    fn loops(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.loops.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::MessageId,
        ports::ReactionStrategy,
        testing::{temp_settings_path, FakeActions, FakeConnection, FakeNotifier, FakeResolver},
    };
    use std::sync::atomic::Ordering;

    const SELF: UserId = UserId(1);
    const OTHER: UserId = UserId(42);

    struct Harness {
        service: MonitorService,
        resolver: Arc<FakeResolver>,
        actions: Arc<FakeActions>,
        notifier: Arc<FakeNotifier>,
    }

    fn harness(tag: &str, reachable: &[i64], accepting: &[ReactionStrategy]) -> Harness {
        let resolver = Arc::new(FakeResolver::with_chats(reachable));
        let actions = Arc::new(FakeActions::accepting(accepting));
        let notifier = Arc::new(FakeNotifier::default());
        let ports = MonitorPorts {
            resolver: resolver.clone(),
            directory: resolver.clone(),
            actions: actions.clone(),
            notifier: notifier.clone(),
            monitor_connection: Arc::new(FakeConnection::new("monitor")),
            operator_connection: Arc::new(FakeConnection::new("operator")),
        };
        let settings = ServiceSettings {
            settings_file: temp_settings_path(tag),
            ..ServiceSettings::default()
        };
        Harness {
            service: MonitorService::new(settings, ports, SELF),
            resolver,
            actions,
            notifier,
        }
    }

    fn inbound(chat_id: &str, message_id: i32, sender: UserId) -> InboundMessage {
        InboundMessage {
            chat_id: chat_id.to_string(),
            message_id: MessageId(message_id),
            sender_id: Some(sender),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn watched_message_is_acked_now_and_reacted_after_the_delay() {
        let h = harness(
            "svc-e2e",
            &[-100500],
            &[ReactionStrategy::ListWrapped, ReactionStrategy::SingleObject],
        );
        h.service.toggle_watch("-100500").await.unwrap();

        let d = h.service.on_message(&inbound("-100500", 7, OTHER)).await;
        assert_eq!(d, InboundDisposition::Scheduled);
        assert_eq!(h.actions.acks(), vec![(-100500, MessageId(7))]);
        assert!(h.actions.attempts().is_empty());

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(
            h.actions.attempts(),
            vec![(-100500, MessageId(7), ReactionStrategy::ListWrapped)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn short_form_chat_ids_match_the_watch_set() {
        let h = harness("svc-short", &[-100500], &[ReactionStrategy::ListWrapped]);
        h.service.toggle_watch("-100500").await.unwrap();

        let d = h.service.on_message(&inbound("-500", 1, OTHER)).await;
        assert_eq!(d, InboundDisposition::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn own_and_unwatched_messages_are_ignored() {
        let h = harness("svc-ignore", &[-100500, -100600], &[]);
        h.service.toggle_watch("-100500").await.unwrap();

        assert_eq!(
            h.service.on_message(&inbound("-100500", 1, SELF)).await,
            InboundDisposition::OwnMessage
        );
        assert_eq!(
            h.service.on_message(&inbound("-100600", 1, OTHER)).await,
            InboundDisposition::NotWatched
        );
        assert!(h.actions.acks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn anonymous_channel_posts_are_eligible() {
        let h = harness("svc-anon", &[-100500], &[ReactionStrategy::ListWrapped]);
        h.service.toggle_watch("-100500").await.unwrap();

        let post = InboundMessage {
            chat_id: "-100500".to_string(),
            message_id: MessageId(3),
            sender_id: None,
        };
        assert_eq!(h.service.on_message(&post).await, InboundDisposition::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_delivery_schedules_once() {
        let h = harness("svc-dup", &[-100500], &[ReactionStrategy::ListWrapped]);
        h.service.toggle_watch("-100500").await.unwrap();

        let msg = inbound("-100500", 9, OTHER);
        assert_eq!(h.service.on_message(&msg).await, InboundDisposition::Scheduled);
        assert_eq!(h.service.on_message(&msg).await, InboundDisposition::Duplicate);

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(h.actions.attempts().len(), 1);
        assert_eq!(h.actions.acks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_failure_does_not_block_scheduling() {
        let h = harness("svc-ackfail", &[-100500], &[ReactionStrategy::ListWrapped]);
        h.service.toggle_watch("-100500").await.unwrap();
        h.actions.fail_acks.store(true, Ordering::SeqCst);

        let d = h.service.on_message(&inbound("-100500", 2, OTHER)).await;
        assert_eq!(d, InboundDisposition::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_watched_chat_is_skipped() {
        let h = harness("svc-unres", &[-100500], &[]);
        h.service.toggle_watch("-100500").await.unwrap();
        h.resolver.remove(-100500);
        h.service.cache.clear().await;

        let d = h.service.on_message(&inbound("-100500", 4, OTHER)).await;
        assert_eq!(d, InboundDisposition::Unresolvable);
        assert!(h.actions.acks().is_empty());
        assert!(h.service.is_watched("-100500"));
        assert_eq!(h.service.status().await.pending_reactions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_flips_watch_state_and_persists() {
        let h = harness("svc-toggle", &[-100500], &[]);

        let on = h.service.toggle_watch("-500").await.unwrap();
        assert_eq!(
            on,
            ToggleOutcome {
                chat_id: "-100500".to_string(),
                now_watching: true,
                title: "Chat -100500".to_string(),
            }
        );
        assert!(h.service.is_watched("-100500"));

        let off = h.service.toggle_watch("-100500").await.unwrap();
        assert!(!off.now_watching);
        assert!(!h.service.is_watched("-100500"));

        let on_disk = std::fs::read_to_string(&h.service.settings.settings_file).unwrap();
        assert_eq!(on_disk, "{}");
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_off_removes_legacy_short_keys() {
        let path = temp_settings_path("svc-legacy");
        std::fs::write(&path, r#"{"-777":true}"#).unwrap();
        let resolver = Arc::new(FakeResolver::with_chats(&[-100777]));
        let ports = MonitorPorts {
            resolver: resolver.clone(),
            directory: resolver,
            actions: Arc::new(FakeActions::default()),
            notifier: Arc::new(FakeNotifier::default()),
            monitor_connection: Arc::new(FakeConnection::new("monitor")),
            operator_connection: Arc::new(FakeConnection::new("operator")),
        };
        let service = MonitorService::new(
            ServiceSettings {
                settings_file: path,
                ..ServiceSettings::default()
            },
            ports,
            SELF,
        );

        let off = service.toggle_watch("-100777").await.unwrap();
        assert_eq!(off.chat_id, "-777");
        assert!(!off.now_watching);
        assert!(!service.is_watched("-100777"));
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_on_fails_for_unreachable_or_malformed_ids() {
        let h = harness("svc-toggle-err", &[], &[]);

        let err = h.service.toggle_watch("-100123").await.unwrap_err();
        assert!(matches!(err, Error::Unreachable { .. }));
        assert!(matches!(
            h.service.toggle_watch("not-a-chat").await,
            Err(Error::Resolve(_))
        ));
        assert!(!h.service.is_watched("-100123"));
    }

    #[tokio::test(start_paused = true)]
    async fn list_watched_reports_reachability() {
        let h = harness("svc-list", &[-1001, -1002], &[]);
        h.service.toggle_watch("-1001").await.unwrap();
        h.service.toggle_watch("-1002").await.unwrap();
        h.resolver.remove(-1002);
        h.service.cache.clear().await;

        let rows = h.service.list_watched().await;
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.id == "-1001" && r.reachable));
        assert!(rows
            .iter()
            .any(|r| r.id == "-1002" && !r.reachable && r.title == "Chat -1002"));
    }

    #[tokio::test]
    async fn list_chats_filters_and_marks_watched() {
        let h = harness("svc-chats", &[], &[]);
        h.resolver.add(-1001, "Alpha News");
        h.resolver.add(-1002, "Beta Talk");
        h.service.toggle_watch("-1001").await.unwrap();

        let all = h.service.list_chats(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let found = h.service.list_chats(Some("  ALPHA ")).await.unwrap();
        assert_eq!(
            found,
            vec![ListedChat {
                id: -1001,
                title: "Alpha News".to_string(),
                watched: true,
            }]
        );
        assert!(h.service.list_chats(Some("gamma")).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn on_demand_reconciliation_returns_removed_count() {
        let h = harness("svc-rec", &[-1001, -1002], &[]);
        h.service.toggle_watch("-1001").await.unwrap();
        h.service.toggle_watch("-1002").await.unwrap();
        h.resolver.remove(-1002);
        h.service.cache.clear().await;

        assert_eq!(h.service.run_reconciliation_now().await, 1);
        assert_eq!(h.notifier.sent().len(), 1);
        assert!(h.service.status().await.last_reconciled.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_reactions_and_loops() {
        let h = harness("svc-stop", &[-100500], &[ReactionStrategy::ListWrapped]);
        h.service.toggle_watch("-100500").await.unwrap();
        h.service.start();

        h.service.on_message(&inbound("-100500", 1, OTHER)).await;
        h.service.on_message(&inbound("-100500", 2, OTHER)).await;

        assert_eq!(h.service.shutdown().await, 2);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(h.actions.attempts().is_empty());
        assert_eq!(
            h.service.on_message(&inbound("-100500", 3, OTHER)).await,
            InboundDisposition::Stopped
        );
    }
}
