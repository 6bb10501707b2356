use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use trackeep_types::events::{EventEnvelope, EventPayload};
use trackeep_types::models::{ConversationId, UserId};

/// One serialized envelope, shared by every recipient of a send.
pub type Frame = Arc<str>;

/// One live connection: a user id plus a bounded outbound queue.
pub struct Client {
    pub id: Uuid,
    pub user_id: UserId,
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
    closed: AtomicBool,
}

impl Client {
    fn new(user_id: UserId, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            tx: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Non-blocking enqueue. A full or closed queue counts as a dead client.
    fn try_send(&self, frame: &Frame) -> bool {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.try_send(frame.clone()).is_ok(),
            None => false,
        }
    }

    /// Drop the sender so the writer task sees end-of-stream. Only the first
    /// call does anything; returns whether this call closed the queue.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        true
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Room registry and fan-out. All membership state sits behind one mutex;
/// enqueueing happens after the lock is released.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    state: Mutex<HubState>,
    queue_capacity: usize,
}

#[derive(Default)]
struct HubState {
    /// room -> (client id -> client)
    rooms: HashMap<ConversationId, HashMap<Uuid, Arc<Client>>>,
    /// client id -> rooms it is in
    clients: HashMap<Uuid, HashSet<ConversationId>>,
}

impl Hub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a client for a new connection. Nothing is tracked until the
    /// client subscribes to a room.
    pub fn register(&self, user_id: UserId) -> (Arc<Client>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        (Arc::new(Client::new(user_id, tx)), rx)
    }

    /// Idempotent. Returns true if the client was not already in the room.
    /// A disconnected client is never re-added.
    pub fn subscribe(&self, client: &Arc<Client>, room: ConversationId) -> bool {
        let mut state = self.state();
        if client.is_closed() {
            return false;
        }

        let added = state
            .rooms
            .entry(room)
            .or_default()
            .insert(client.id, client.clone())
            .is_none();
        state.clients.entry(client.id).or_default().insert(room);
        added
    }

    /// Idempotent. Empty room and client entries are dropped.
    pub fn unsubscribe(&self, client: &Client, room: ConversationId) -> bool {
        let mut state = self.state();
        state.detach(client.id, room)
    }

    /// Remove every client of `user_id` from `room`. Used when membership is
    /// revoked. Returns how many clients were removed.
    pub fn unsubscribe_user(&self, room: ConversationId, user_id: UserId) -> usize {
        let mut state = self.state();
        let ids: Vec<Uuid> = match state.rooms.get(&room) {
            Some(members) => members
                .values()
                .filter(|c| c.user_id == user_id)
                .map(|c| c.id)
                .collect(),
            None => return 0,
        };

        for id in &ids {
            state.detach(*id, room);
        }
        ids.len()
    }

    /// Remove the client from every room, then close its queue. Safe to call
    /// more than once and from any path.
    pub fn disconnect(&self, client: &Client) {
        let (rooms, closed_now) = {
            let mut state = self.state();
            let rooms = state.clients.remove(&client.id).unwrap_or_default();
            for room in &rooms {
                if let Some(members) = state.rooms.get_mut(room) {
                    members.remove(&client.id);
                    if members.is_empty() {
                        state.rooms.remove(room);
                    }
                }
            }
            // Closed under the lock so a racing subscribe cannot re-add it
            (rooms, client.close())
        };

        if closed_now {
            debug!(
                "Client {} (user {}) disconnected from {} room(s)",
                client.id,
                client.user_id,
                rooms.len()
            );
        }
    }

    /// Fan an event out to every client in the room. Returns the number of
    /// clients the frame was queued for.
    pub fn broadcast(&self, room: ConversationId, payload: &EventPayload) -> usize {
        let targets = self.targets(room, |_| true);
        self.deliver(room, payload, targets)
    }

    /// Same as `broadcast`, restricted to one user's clients in the room.
    pub fn send_to_user(&self, room: ConversationId, user_id: UserId, payload: &EventPayload) -> usize {
        let targets = self.targets(room, |c| c.user_id == user_id);
        self.deliver(room, payload, targets)
    }

    fn targets(&self, room: ConversationId, keep: impl Fn(&Client) -> bool) -> Vec<Arc<Client>> {
        let state = self.state();
        state
            .rooms
            .get(&room)
            .map(|members| members.values().filter(|c| keep(c.as_ref())).cloned().collect())
            .unwrap_or_default()
    }

    fn deliver(&self, room: ConversationId, payload: &EventPayload, targets: Vec<Arc<Client>>) -> usize {
        if targets.is_empty() {
            return 0;
        }

        let Some(frame) = encode(room, payload) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for client in targets {
            if client.try_send(&frame) {
                delivered += 1;
            } else {
                dead.push(client);
            }
        }

        for client in dead {
            warn!(
                "Dropping client {} (user {}): outbound queue full or closed",
                client.id, client.user_id
            );
            self.disconnect(&client);
        }

        delivered
    }

    pub fn room_count(&self) -> usize {
        self.state().rooms.len()
    }

    pub fn tracked_client_count(&self) -> usize {
        self.state().clients.len()
    }

    pub fn subscriber_count(&self, room: ConversationId) -> usize {
        self.state().rooms.get(&room).map_or(0, HashMap::len)
    }

    pub fn rooms_of(&self, client: &Client) -> Vec<ConversationId> {
        let mut rooms: Vec<_> = self
            .state()
            .clients
            .get(&client.id)
            .map(|r| r.iter().copied().collect())
            .unwrap_or_default();
        rooms.sort_unstable();
        rooms
    }
}

impl HubState {
    fn detach(&mut self, client_id: Uuid, room: ConversationId) -> bool {
        let removed = match self.rooms.get_mut(&room) {
            Some(members) => {
                let removed = members.remove(&client_id).is_some();
                if members.is_empty() {
                    self.rooms.remove(&room);
                }
                removed
            }
            None => false,
        };

        if let Some(rooms) = self.clients.get_mut(&client_id) {
            rooms.remove(&room);
            if rooms.is_empty() {
                self.clients.remove(&client_id);
            }
        }
        removed
    }
}

/// Serialize once per send; the hub stamps the time.
fn encode(room: ConversationId, payload: &EventPayload) -> Option<Frame> {
    let envelope = EventEnvelope::new(room, payload, Utc::now())
        .and_then(|env| serde_json::to_string(&env));
    match envelope {
        Ok(json) => Some(Frame::from(json)),
        Err(e) => {
            warn!("Failed to encode {} event: {}", payload.event_type(), e);
            None
        }
    }
}
