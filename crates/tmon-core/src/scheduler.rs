//! Delayed engagement scheduler.
//!
//! Each eligible message gets one independently scheduled unit:
//!
//! `Eligible -> Scheduled -> Waiting -> Resolving -> Acting -> Done`
//! or `Waiting -> Resolving -> Aborted` when the chat can no longer be resolved.
//!
//! The `(chat, message)` key is claimed synchronously before the unit is
//! spawned, so duplicate deliveries of one update can never schedule twice.
//! Claims are kept in insertion order and trimmed to `processed_cap`.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChatHandle, MessageId, MessageKey},
    ports::{MonitorActions, OperatorNotifier, ReactionPayload, ReactionStrategy},
    resolver::EntityCache,
    store::MonitoredSetStore,
};

pub const DEFAULT_DELAY: Duration = Duration::from_secs(120);
pub const DEFAULT_PROCESSED_CAP: usize = 1000;
pub const DEFAULT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_EMOJI: &str = "👀";

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    pub delay: Duration,
    pub processed_cap: usize,
    pub emoji: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            processed_cap: DEFAULT_PROCESSED_CAP,
            emoji: DEFAULT_EMOJI.to_string(),
        }
    }
}

// === Processed-message claims ===

/// Insertion-ordered set of claimed message keys with a soft cap.
#[derive(Debug)]
pub struct ProcessedKeys {
    order: VecDeque<MessageKey>,
    members: HashSet<MessageKey>,
    cap: usize,
}

impl ProcessedKeys {
    pub fn new(cap: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            cap,
        }
    }

    /// Claim `key`. Returns `false` if it was already claimed.
    pub fn claim(&mut self, key: MessageKey) -> bool {
        if !self.members.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        true
    }

    pub fn release(&mut self, key: &MessageKey) -> bool {
        if !self.members.remove(key) {
            return false;
        }
        self.order.retain(|k| k != key);
        true
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.members.contains(key)
    }

    /// Evict the oldest claims until at most `cap` remain. Returns the number evicted.
    pub fn trim(&mut self) -> usize {
        let mut evicted = 0usize;
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.members.remove(&old);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// === Units ===

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionPhase {
    Waiting,
    Resolving,
    Acting,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    Reacted(ReactionStrategy),
    /// Every strategy was rejected; the claim was released.
    Exhausted,
    /// The chat did not resolve; it was dropped from the watch set.
    Aborted,
    Cancelled,
}

/// Result of walking the reaction fallback chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered(ReactionStrategy),
    Exhausted(Vec<(ReactionStrategy, String)>),
}

/// Try each strategy in `ReactionStrategy::CHAIN` order; stop at the first accepted one.
pub async fn deliver_engagement(
    actions: &dyn MonitorActions,
    chat: &ChatHandle,
    message_id: MessageId,
    emoji: &str,
) -> Delivery {
    let mut failures = Vec::new();
    for strategy in ReactionStrategy::CHAIN {
        let payload = ReactionPayload {
            strategy,
            emoji: emoji.to_string(),
        };
        match actions.send_engagement(chat, message_id, &payload).await {
            Ok(()) => {
                tracing::info!(chat_id = chat.id, message_id = message_id.0, ?strategy, "reaction added");
                return Delivery::Delivered(strategy);
            }
            Err(e) => {
                tracing::warn!(chat_id = chat.id, message_id = message_id.0, ?strategy, error = %e, "reaction strategy failed");
                failures.push((strategy, e.to_string()));
            }
        }
    }
    Delivery::Exhausted(failures)
}

struct PendingAction {
    scheduled_at: Instant,
    fire_at: Instant,
    phase: ActionPhase,
}

struct SchedulerState {
    processed: ProcessedKeys,
    pending: HashMap<MessageKey, PendingAction>,
}

#[derive(Clone)]
pub struct ReactionScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    settings: SchedulerSettings,
    cache: Arc<EntityCache>,
    store: Arc<MonitoredSetStore>,
    actions: Arc<dyn MonitorActions>,
    notifier: Arc<dyn OperatorNotifier>,
    shutdown: CancellationToken,
    state: Mutex<SchedulerState>,
}

impl ReactionScheduler {
    pub fn new(
        settings: SchedulerSettings,
        cache: Arc<EntityCache>,
        store: Arc<MonitoredSetStore>,
        actions: Arc<dyn MonitorActions>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        let cap = settings.processed_cap;
        Self {
            inner: Arc::new(SchedulerInner {
                settings,
                cache,
                store,
                actions,
                notifier,
                shutdown: CancellationToken::new(),
                state: Mutex::new(SchedulerState {
                    processed: ProcessedKeys::new(cap),
                    pending: HashMap::new(),
                }),
            }),
        }
    }

    /// Claim `(chat_id, message_id)` and schedule its delayed engagement.
    ///
    /// Returns `false` (and does nothing) if the message was already claimed or
    /// the scheduler is shut down.
    pub fn on_eligible_message(&self, chat_id: &str, message_id: MessageId) -> bool {
        let key = MessageKey::new(chat_id, message_id);
        let cancel = self.inner.shutdown.child_token();

        {
            let mut st = self.state();
            if self.inner.shutdown.is_cancelled() {
                tracing::debug!(%key, "scheduler stopped, ignoring message");
                return false;
            }
            if !st.processed.claim(key.clone()) {
                tracing::info!(%key, "message already processed");
                return false;
            }
            let evicted = st.processed.trim();
            if evicted > 0 {
                tracing::debug!(evicted, "trimmed processed-message claims");
            }

            let now = Instant::now();
            st.pending.insert(
                key.clone(),
                PendingAction {
                    scheduled_at: now,
                    fire_at: now + self.inner.settings.delay,
                    phase: ActionPhase::Waiting,
                },
            );
        }

        tracing::info!(
            %key,
            delay_secs = self.inner.settings.delay.as_secs(),
            "reaction scheduled"
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_unit(key, cancel).await;
        });
        true
    }

    async fn run_unit(&self, key: MessageKey, cancel: CancellationToken) {
        tokio::select! {
          _ = cancel.cancelled() => {
            tracing::debug!(%key, "reaction cancelled before firing");
            self.state().pending.remove(&key);
            return;
          }
          _ = sleep(self.inner.settings.delay) => {}
        }

        let outcome = tokio::select! {
          _ = cancel.cancelled() => ActionOutcome::Cancelled,
          outcome = self.execute(&key) => outcome,
        };

        let waited = {
            let mut st = self.state();
            st.pending
                .remove(&key)
                .map(|p| p.scheduled_at.elapsed())
                .unwrap_or_default()
        };
        tracing::debug!(%key, ?outcome, waited_secs = waited.as_secs(), "reaction unit finished");
    }

    async fn execute(&self, key: &MessageKey) -> ActionOutcome {
        self.set_phase(key, ActionPhase::Resolving);

        let chat = match self.inner.cache.resolve(&key.chat_id).await {
            Ok(chat) => chat,
            Err(e) => {
                tracing::error!(%key, error = %e, "chat not found for reaction");
                self.drop_unreachable(&key.chat_id).await;
                self.release(key);
                return ActionOutcome::Aborted;
            }
        };

        self.set_phase(key, ActionPhase::Acting);
        match deliver_engagement(
            self.inner.actions.as_ref(),
            &chat,
            key.message_id,
            &self.inner.settings.emoji,
        )
        .await
        {
            Delivery::Delivered(strategy) => ActionOutcome::Reacted(strategy),
            Delivery::Exhausted(failures) => {
                tracing::error!(%key, attempts = failures.len(), "could not add reaction with any strategy");
                self.release(key);
                ActionOutcome::Exhausted
            }
        }
    }

    async fn drop_unreachable(&self, chat_id: &str) {
        self.inner.cache.invalidate(chat_id).await;

        let Some(stored) = self.inner.store.matched_key(chat_id) else {
            return;
        };
        if !self.inner.store.remove_key(&stored) {
            return;
        }
        tracing::warn!(chat_id = %stored, "chat removed from monitoring: no longer reachable");

        let text = format!(
            "⚠️ Chat {stored} was removed from monitoring: the monitor no longer has access to it."
        );
        if let Err(e) = self.inner.notifier.notify_operator(&text).await {
            tracing::error!(error = %e, "failed to notify operator");
        }
    }

    fn release(&self, key: &MessageKey) {
        self.state().processed.release(key);
    }

    fn set_phase(&self, key: &MessageKey, phase: ActionPhase) {
        if let Some(p) = self.state().pending.get_mut(key) {
            p.phase = phase;
        }
    }

    /// Trim claims down to the cap. Returns the number evicted.
    pub fn trim_processed(&self) -> usize {
        let mut st = self.state();
        let before = st.processed.len();
        let evicted = st.processed.trim();
        if evicted > 0 {
            tracing::info!(before, after = st.processed.len(), "cleaned processed-message list");
        }
        evicted
    }

    /// Periodic safety-net trim, independent of the inline check.
    pub fn spawn_housekeeping(&self, every: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        let tok = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let mut tick = interval(every);
            loop {
                tokio::select! {
                  _ = tok.cancelled() => break,
                  _ = tick.tick() => {
                    scheduler.trim_processed();
                  }
                }
            }
        })
    }

    /// Cancel every pending unit; their claims are abandoned in place.
    pub fn shutdown(&self) -> usize {
        self.inner.shutdown.cancel();
        let mut st = self.state();
        let cancelled = st.pending.len();
        st.pending.clear();
        tracing::info!(cancelled, "reaction scheduler stopped");
        cancelled
    }

    pub fn is_claimed(&self, chat_id: &str, message_id: MessageId) -> bool {
        self.state()
            .processed
            .contains(&MessageKey::new(chat_id, message_id))
    }

    pub fn processed_len(&self) -> usize {
        self.state().processed.len()
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Phase and remaining wait of a pending unit.
    pub fn pending_status(&self, chat_id: &str, message_id: MessageId) -> Option<(ActionPhase, Duration)> {
        let st = self.state();
        st.pending
            .get(&MessageKey::new(chat_id, message_id))
            .map(|p| (p.phase, p.fire_at.saturating_duration_since(Instant::now())))
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
