use super::session::Session;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

/// Session visible to readers, plus how many times pending cold starts were cancelled
#[derive(Default)]
struct Published {
    session: Option<Arc<Session>>,
    cancels: u64,
}

/// Per stream id slot: an async gate serializing structural changes, and the published
/// session that readers see without taking the gate.
#[derive(Default)]
struct Slot {
    gate: Arc<tokio::sync::Mutex<()>>,
    current: RwLock<Published>,
}

impl Slot {
    fn published(&self) -> RwLockReadGuard<'_, Published> {
        match self.current.read() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn published_mut(&self) -> RwLockWriteGuard<'_, Published> {
        match self.current.write() {
            Ok(current) => current,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read(&self) -> Option<Arc<Session>> {
        self.published().session.clone()
    }

    fn replace(&self, session: Option<Arc<Session>>) -> Option<Arc<Session>> {
        std::mem::replace(&mut self.published_mut().session, session)
    }

    fn cancels(&self) -> u64 {
        self.published().cancels
    }

    fn cancel(&self) -> Option<Arc<Session>> {
        let mut published = self.published_mut();
        published.cancels = published.cancels.wrapping_add(1);
        published.session.clone()
    }
}

/// Exclusive access to one stream id's slot
///
/// While a guard is alive no other task can insert or remove a session for the same id.
/// Readers using [`SessionStore::get`] are never blocked.
pub struct SlotGuard {
    stream_id: String,
    slot: Arc<Slot>,
    /// Cancel count observed before queueing on the gate
    epoch: u64,
    _permit: OwnedMutexGuard<()>,
}

impl SlotGuard {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.slot.read()
    }

    /// Publish `session`, returning whatever was there before
    pub fn insert(&mut self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.slot.replace(Some(session))
    }

    pub fn take(&mut self) -> Option<Arc<Session>> {
        self.slot.replace(None)
    }

    /// Whether [`SessionStore::cancel`] was called for this id since the guard was requested
    pub fn is_cancelled(&self) -> bool {
        self.slot.cancels() != self.epoch
    }
}

/// In-memory map of stream id to live session
#[derive(Default)]
pub struct SessionStore {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot>>> {
        match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn slot(&self, stream_id: &str) -> Arc<Slot> {
        let mut slots = self.slots();
        Arc::clone(slots.entry(stream_id.to_string()).or_default())
    }

    /// Acquire exclusivity over `stream_id`, waiting for any holder to finish
    pub async fn lock(&self, stream_id: &str) -> SlotGuard {
        let slot = self.slot(stream_id);
        let epoch = slot.cancels();
        let permit = Arc::clone(&slot.gate).lock_owned().await;

        SlotGuard {
            stream_id: stream_id.to_string(),
            slot,
            epoch,
            _permit: permit,
        }
    }

    /// Return the session for `stream_id` if `reuse` accepts it; otherwise run `factory` with
    /// exclusivity held. Concurrent callers for the same id queue on the gate and re-check
    /// `reuse` against whatever the first caller published.
    pub async fn get_or_create<R, F, Fut, E>(
        &self,
        stream_id: &str,
        reuse: R,
        factory: F,
    ) -> Result<Arc<Session>, E>
    where
        R: FnOnce(&Session) -> bool,
        F: FnOnce(SlotGuard) -> Fut,
        Fut: Future<Output = Result<Arc<Session>, E>>,
    {
        let guard = self.lock(stream_id).await;

        if let Some(session) = guard.current() {
            if reuse(&session) {
                return Ok(session);
            }
        }

        factory(guard).await
    }

    /// Published session for `stream_id`, in any state
    pub fn get(&self, stream_id: &str) -> Option<Arc<Session>> {
        let slot = self.slots().get(stream_id).cloned()?;
        slot.read()
    }

    /// Flag every guard already requested for `stream_id` as cancelled, without taking the
    /// gate, and return the published session
    pub fn cancel(&self, stream_id: &str) -> Option<Arc<Session>> {
        let slot = self.slots().get(stream_id).cloned()?;
        slot.cancel()
    }

    /// Remove and return the session for `stream_id`, serialized with `get_or_create`
    pub async fn remove(&self, stream_id: &str) -> Option<Arc<Session>> {
        let removed = {
            let mut guard = self.lock(stream_id).await;
            guard.take()
        };
        self.prune(stream_id);
        removed
    }

    /// Slide the expiry deadline of a live session; does not take the per-id gate
    pub fn renew_expiry(&self, stream_id: &str, idle_timeout: Duration) -> bool {
        match self.get(stream_id) {
            Some(session) => {
                session.renew(idle_timeout);
                true
            }
            None => false,
        }
    }

    /// Snapshot of every published session
    pub fn all(&self) -> Vec<Arc<Session>> {
        let slots: Vec<Arc<Slot>> = self.slots().values().cloned().collect();
        slots.iter().filter_map(|slot| slot.read()).collect()
    }

    pub fn len(&self) -> usize {
        self.all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the slot for `stream_id` if it is empty and nobody holds or awaits it
    pub fn prune(&self, stream_id: &str) {
        let mut slots = self.slots();
        let idle = slots
            .get(stream_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1 && slot.read().is_none());
        if idle {
            slots.remove(stream_id);
        }
    }

    /// Number of slots, including empty ones still in use
    pub fn slot_count(&self) -> usize {
        self.slots().len()
    }
}
