//! The Hub's in-memory topology (spec.md §3 "Topology (Hub-only)", §5).
//!
//! Generalizes the teacher's per-concern `Arc<RwLock<HashMap<...>>>` maps in
//! `AppState` (`active_forwarders`, `broadcast_registry`) into a single
//! session map keyed by `(kind, id)` plus an `env_id -> {agent_id}`
//! membership map, matching spec.md's registry shape exactly.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use star_protocol::{Envelope, EnvelopeType, Identity, IdentityKind};

/// A session's lifecycle stage (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Open,
    Closing,
    Closed,
}

/// Why a session was torn down by the Hub, used only for logging — the
/// taxonomy's `REPLACED`/`IDLE_TIMEOUT` codes (spec.md §7) are liveness
/// errors, sink-logged rather than sent to the evicted peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Replaced,
    IdleTimeout,
    Disconnected,
    Shutdown,
}

/// A bounded outbound queue with the §4.2 drop policy: when full, the oldest
/// non-heartbeat envelope is dropped to make room rather than blocking the
/// sender or dropping the newest arrival. Plain `std::sync::Mutex` is safe
/// here since every critical section is non-blocking and never spans an
/// `.await` (spec.md §5).
pub struct SendQueue {
    inner: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl SendQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn enqueue(&self, envelope: Envelope) {
        {
            let mut queue = self.inner.lock().expect("send queue mutex poisoned");
            if queue.len() >= self.capacity {
                let victim = queue
                    .iter()
                    .position(|e| e.envelope_type != EnvelopeType::Heartbeat)
                    .unwrap_or(0);
                queue.remove(victim);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(envelope);
        }
        self.notify.notify_one();
    }

    /// Wait for and remove the next envelope in FIFO order.
    pub async fn dequeue(&self) -> Envelope {
        loop {
            {
                let mut queue = self.inner.lock().expect("send queue mutex poisoned");
                if let Some(envelope) = queue.pop_front() {
                    return envelope;
                }
            }
            self.notify.notified().await;
        }
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct SessionEntry {
    identity: Identity,
    env_id: Option<String>,
    send_queue: Arc<SendQueue>,
    last_traffic_seen: Arc<Mutex<Instant>>,
    last_heartbeat_sent: Arc<Mutex<Option<Instant>>>,
    state: Arc<Mutex<SessionState>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// A read-only view of one live session, returned by lookups.
#[derive(Clone)]
pub struct SessionHandle {
    pub identity: Identity,
    pub send_queue: Arc<SendQueue>,
    pub last_traffic_seen: Arc<Mutex<Instant>>,
}

/// What `register` did with a pre-existing session for the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Inserted,
    Replaced,
}

/// Handles for the two tasks backing a new session, supplied by the
/// acceptor once both are spawned.
pub struct SessionTasks {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

/// The Hub's session map plus agent/environment membership (spec.md §3).
#[derive(Default)]
pub struct Registry {
    sessions: RwLock<HashMap<(IdentityKind, String), SessionEntry>>,
    membership: RwLock<HashMap<String, HashSet<String>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session, evicting (I1) any existing session for the
    /// same identity first. `env_id` is the environment an agent is
    /// attached to (spec.md I2); `None` for environment/human sessions.
    pub async fn register(
        &self,
        identity: Identity,
        env_id: Option<String>,
        send_queue: Arc<SendQueue>,
        tasks: SessionTasks,
    ) -> RegisterOutcome {
        let key = (identity.kind, identity.id.clone());
        let entry = SessionEntry {
            identity: identity.clone(),
            env_id: env_id.clone(),
            send_queue: send_queue.clone(),
            last_traffic_seen: Arc::new(Mutex::new(Instant::now())),
            last_heartbeat_sent: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(SessionState::Open)),
            reader: tasks.reader,
            writer: tasks.writer,
        };

        let (outcome, previous_env_id) = {
            let mut sessions = self.sessions.write().await;
            let previous = sessions.insert(key, entry);
            match previous {
                Some(previous) => {
                    let previous_env_id = previous.env_id.clone();
                    evict(previous, CloseReason::Replaced);
                    (RegisterOutcome::Replaced, previous_env_id)
                }
                None => (RegisterOutcome::Inserted, None),
            }
        };

        if identity.kind == IdentityKind::Agent {
            if let Some(old_env_id) = previous_env_id {
                let mut membership = self.membership.write().await;
                if let Some(agents) = membership.get_mut(&old_env_id) {
                    agents.remove(&identity.id);
                    if agents.is_empty() {
                        membership.remove(&old_env_id);
                    }
                }
            }
            if let Some(env_id) = env_id {
                let mut membership = self.membership.write().await;
                membership.entry(env_id).or_default().insert(identity.id.clone());
            }
        }

        outcome
    }

    /// Remove a session on normal exit (transport closed, not evicted).
    pub async fn deregister(&self, identity: &Identity) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&(identity.kind, identity.id.clone()))
        };
        let Some(removed) = removed else { return };
        if identity.kind == IdentityKind::Agent {
            if let Some(env_id) = &removed.env_id {
                let mut membership = self.membership.write().await;
                if let Some(agents) = membership.get_mut(env_id) {
                    agents.remove(&identity.id);
                    if agents.is_empty() {
                        membership.remove(env_id);
                    }
                }
            }
        }
        *removed.state.lock().expect("state mutex poisoned") = SessionState::Closed;
    }

    /// Evict a session the Hub is closing on its own initiative (idle
    /// timeout). Distinct from `deregister`, which only removes bookkeeping
    /// after the transport is already gone.
    pub async fn evict(&self, identity: &Identity, reason: CloseReason) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&(identity.kind, identity.id.clone()))
        };
        if let Some(removed) = removed {
            if identity.kind == IdentityKind::Agent {
                if let Some(env_id) = &removed.env_id {
                    let mut membership = self.membership.write().await;
                    if let Some(agents) = membership.get_mut(env_id) {
                        agents.remove(&identity.id);
                        if agents.is_empty() {
                            membership.remove(env_id);
                        }
                    }
                }
            }
            evict(removed, reason);
        }
    }

    pub async fn lookup(&self, kind: IdentityKind, id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(&(kind, id.to_owned())).map(|entry| SessionHandle {
            identity: entry.identity.clone(),
            send_queue: entry.send_queue.clone(),
            last_traffic_seen: entry.last_traffic_seen.clone(),
        })
    }

    pub async fn is_open(&self, kind: IdentityKind, id: &str) -> bool {
        self.sessions.read().await.contains_key(&(kind, id.to_owned()))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Every open session of `kind`, excluding `exclude`. Used for global
    /// broadcast (spec.md §4.4 "All other broadcasts are global").
    pub async fn all_of_kind(&self, kind: IdentityKind, exclude: &Identity) -> Vec<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|entry| entry.identity.kind == kind && &entry.identity != exclude)
            .map(|entry| SessionHandle {
                identity: entry.identity.clone(),
                send_queue: entry.send_queue.clone(),
                last_traffic_seen: entry.last_traffic_seen.clone(),
            })
            .collect()
    }

    /// Agents currently attached to `env_id` (spec.md §4.4 scoped broadcast).
    pub async fn agents_in_environment(&self, env_id: &str) -> Vec<SessionHandle> {
        let agent_ids: Vec<String> = {
            let membership = self.membership.read().await;
            membership
                .get(env_id)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        };
        let sessions = self.sessions.read().await;
        agent_ids
            .into_iter()
            .filter_map(|id| sessions.get(&(IdentityKind::Agent, id.clone())))
            .map(|entry| SessionHandle {
                identity: entry.identity.clone(),
                send_queue: entry.send_queue.clone(),
                last_traffic_seen: entry.last_traffic_seen.clone(),
            })
            .collect()
    }

    /// A snapshot for the heartbeater's sweep: every open session's identity,
    /// send queue, and liveness timestamp (spec.md §4.5).
    pub async fn snapshot(&self) -> Vec<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .map(|entry| SessionHandle {
                identity: entry.identity.clone(),
                send_queue: entry.send_queue.clone(),
                last_traffic_seen: entry.last_traffic_seen.clone(),
            })
            .collect()
    }

    pub async fn touch_traffic(&self, identity: &Identity) {
        let sessions = self.sessions.read().await;
        if let Some(entry) = sessions.get(&(identity.kind, identity.id.clone())) {
            *entry.last_traffic_seen.lock().expect("mutex poisoned") = Instant::now();
        }
    }

    pub async fn record_heartbeat_sent(&self, identity: &Identity) {
        let sessions = self.sessions.read().await;
        if let Some(entry) = sessions.get(&(identity.kind, identity.id.clone())) {
            *entry
                .last_heartbeat_sent
                .lock()
                .expect("mutex poisoned") = Some(Instant::now());
        }
    }
}

fn evict(entry: SessionEntry, reason: CloseReason) {
    *entry.state.lock().expect("state mutex poisoned") = SessionState::Closing;
    entry.reader.abort();
    entry.writer.abort();
    info!(kind = ?entry.identity.kind, id = %entry.identity.id, reason = ?reason, "session evicted");
}
