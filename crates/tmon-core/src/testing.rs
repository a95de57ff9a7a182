//! In-memory port fakes shared by the unit tests.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    domain::{ChatHandle, ChatSummary, MessageId},
    errors::Error,
    ids::{normalize, IdVariant},
    ports::{
        ChatDirectory, ChatResolver, MonitorActions, OperatorNotifier, PlatformConnection,
        ReactionPayload, ReactionStrategy,
    },
    Result,
};

/// Resolves chats registered via `add`, keyed by canonical id.
#[derive(Default)]
pub struct FakeResolver {
    chats: Mutex<HashMap<String, ChatHandle>>,
    calls: AtomicUsize,
    /// Fail this many calls before consulting `chats`.
    fail_first: AtomicUsize,
}

impl FakeResolver {
    pub fn with_chats(ids: &[i64]) -> Self {
        let r = Self::default();
        for id in ids {
            r.add(*id, &format!("Chat {id}"));
        }
        r
    }

    pub fn add(&self, id: i64, title: &str) {
        self.chats.lock().unwrap().insert(
            normalize(&id.to_string()),
            ChatHandle {
                id,
                title: Some(title.to_string()),
            },
        );
    }

    pub fn remove(&self, id: i64) {
        self.chats
            .lock()
            .unwrap()
            .remove(&normalize(&id.to_string()));
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_first.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatResolver for FakeResolver {
    async fn resolve(&self, variant: &IdVariant) -> Result<ChatHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let pending_failures = self.fail_first.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_first.store(pending_failures - 1, Ordering::SeqCst);
            return Err(Error::Resolve("transient".to_string()));
        }

        let key = match variant {
            IdVariant::Original(s) => normalize(s),
            IdVariant::Numeric(n) | IdVariant::Short(n) => normalize(&n.to_string()),
        };
        self.chats
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::Resolve(format!("no such chat: {variant}")))
    }
}

#[async_trait]
impl ChatDirectory for FakeResolver {
    async fn list_channels_and_groups(&self) -> Result<Vec<ChatSummary>> {
        let mut out: Vec<ChatSummary> = self
            .chats
            .lock()
            .unwrap()
            .values()
            .map(|h| ChatSummary {
                id: h.id,
                title: h.display_title(),
            })
            .collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }
}

/// Records read-acks and reaction attempts; accepts only `accepted` strategies.
#[derive(Default)]
pub struct FakeActions {
    pub accepted: Mutex<HashSet<ReactionStrategy>>,
    pub acks: Mutex<Vec<(i64, MessageId)>>,
    pub attempts: Mutex<Vec<(i64, MessageId, ReactionStrategy)>>,
    pub fail_acks: AtomicBool,
}

impl FakeActions {
    pub fn accepting(strategies: &[ReactionStrategy]) -> Self {
        let a = Self::default();
        a.accepted.lock().unwrap().extend(strategies.iter().copied());
        a
    }

    pub fn attempts(&self) -> Vec<(i64, MessageId, ReactionStrategy)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn acks(&self) -> Vec<(i64, MessageId)> {
        self.acks.lock().unwrap().clone()
    }
}

#[async_trait]
impl MonitorActions for FakeActions {
    async fn acknowledge_read(&self, chat: &ChatHandle, message_id: MessageId) -> Result<()> {
        self.acks.lock().unwrap().push((chat.id, message_id));
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(Error::External("ack rejected".to_string()));
        }
        Ok(())
    }

    async fn send_engagement(
        &self,
        chat: &ChatHandle,
        message_id: MessageId,
        payload: &ReactionPayload,
    ) -> Result<()> {
        self.attempts
            .lock()
            .unwrap()
            .push((chat.id, message_id, payload.strategy));
        if self.accepted.lock().unwrap().contains(&payload.strategy) {
            Ok(())
        } else {
            Err(Error::Delivery(format!("{:?} rejected", payload.strategy)))
        }
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub sent: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl FakeNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperatorNotifier for FakeNotifier {
    async fn notify_operator(&self, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::External("operator unreachable".to_string()));
        }
        Ok(())
    }
}

pub struct FakeConnection {
    name: String,
    pub connected: AtomicBool,
    pub authorized: AtomicBool,
    pub reconnects: AtomicUsize,
    pub reconnect_fails: AtomicBool,
}

impl FakeConnection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            connected: AtomicBool::new(true),
            authorized: AtomicBool::new(true),
            reconnects: AtomicUsize::new(0),
            reconnect_fails: AtomicBool::new(false),
        }
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformConnection for FakeConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.reconnect_fails.load(Ordering::SeqCst) {
            return Err(Error::External("network down".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool> {
        Ok(self.authorized.load(Ordering::SeqCst))
    }
}

/// Fresh settings path under the system temp dir, unique per test.
pub fn temp_settings_path(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tmon-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("monitor_settings.json")
}
