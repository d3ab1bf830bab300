use std::sync::{Arc, Mutex};

use futures::{
    StreamExt,
    channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded},
    lock::Mutex as AsyncMutex,
};

use crate::{
    error::ProxyError,
    state::{GlobalState, STATE_KEYS},
    storage::{Storage, StorageChanges, StoredValues},
};

pub type StateReceiver = UnboundedReceiver<GlobalState>;

struct Subscribers {
    stored: StoredValues,
    surfaces: Vec<UnboundedSender<GlobalState>>,
}

struct Inner {
    changes: AsyncMutex<UnboundedReceiver<StorageChanges>>,
    subscribers: Mutex<Subscribers>,
}

/// Fans storage change notifications out to every live surface.
///
/// The channel keeps the last stored values of the state keys and folds each
/// change batch into them, so surfaces get a full [`GlobalState`] without
/// another storage read. Clones share one subscription: either a spawned
/// [`SyncChannel::run`] loop delivers changes, or surfaces pull them with
/// [`SyncChannel::pump_pending`] at the start of their own turn.
#[derive(Clone)]
pub struct SyncChannel {
    inner: Arc<Inner>,
}

impl SyncChannel {
    pub async fn open(storage: &dyn Storage) -> Result<Self, ProxyError> {
        // Subscribe before reading so no write can fall between the two.
        let changes = storage.subscribe();
        let stored = storage
            .get(&STATE_KEYS)
            .await
            .map_err(ProxyError::Persistence)?;
        log::debug!("[sync] opened on {} storage", storage.name());
        Ok(Self {
            inner: Arc::new(Inner {
                changes: AsyncMutex::new(changes),
                subscribers: Mutex::new(Subscribers {
                    stored,
                    surfaces: Vec::new(),
                }),
            }),
        })
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> GlobalState {
        GlobalState::decode(&self.subscribers().stored).state
    }

    /// Registers a surface. The current state is queued immediately.
    pub fn subscribe(&self) -> StateReceiver {
        let (sender, receiver) = unbounded();
        let mut subscribers = self.subscribers();
        let state = GlobalState::decode(&subscribers.stored).state;
        if sender.unbounded_send(state).is_ok() {
            subscribers.surfaces.push(sender);
        }
        log::debug!("[sync] {} live surfaces", subscribers.surfaces.len());
        receiver
    }

    pub fn surface_count(&self) -> usize {
        self.subscribers().surfaces.len()
    }

    /// Applies one change batch and notifies surfaces. Returns how many
    /// surfaces received it; closed surfaces are dropped.
    pub fn publish(&self, changes: StorageChanges) -> usize {
        let mut subscribers = self.subscribers();
        let mut relevant = false;
        for (key, change) in changes {
            if STATE_KEYS.contains(&key.as_str()) {
                subscribers.stored.insert(key, change.new_value);
                relevant = true;
            }
        }
        if !relevant {
            return 0;
        }

        let state = GlobalState::decode(&subscribers.stored).state;
        subscribers
            .surfaces
            .retain(|surface| surface.unbounded_send(state.clone()).is_ok());
        log::debug!(
            "[sync] state published to {} surfaces (enabled={}, current={})",
            subscribers.surfaces.len(),
            state.proxy_enabled(),
            state.current_profile_id()
        );
        subscribers.surfaces.len()
    }

    /// Waits for the next storage change and publishes it. `false` once the
    /// storage side has gone away.
    pub async fn pump(&self) -> bool {
        let next = self.inner.changes.lock().await.next().await;
        match next {
            Some(changes) => {
                self.publish(changes);
                true
            }
            None => false,
        }
    }

    /// Publishes every change already queued, without waiting. Does nothing
    /// while a [`SyncChannel::run`] loop owns the subscription.
    pub fn pump_pending(&self) -> usize {
        let Some(mut changes) = self.inner.changes.try_lock() else {
            return 0;
        };
        let mut processed = 0;
        while let Ok(Some(batch)) = changes.try_next() {
            self.publish(batch);
            processed += 1;
        }
        processed
    }

    pub async fn run(self) {
        log::info!("[sync] running");
        while self.pump().await {}
        log::info!("[sync] storage closed, stopping");
    }
}
