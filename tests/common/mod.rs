//! In-process fakes for the two external collaborators.
//!
//! `RecordingApplier` stands in for the platform proxy mechanism and
//! `RecordingStorage` for the key-value store; both record every call and
//! can be told to fail.
#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use futures::{
    FutureExt,
    channel::mpsc::UnboundedReceiver,
    future::{self, BoxFuture},
};
use log::LevelFilter;
use proxy_switch::{
    GlobalState, MemoryStorage, ProfileId, ProfileStore, ProxyActivation, ProxyApplier,
    ProxyProfile, ProxySettings, Storage,
    state::{CURRENT_PROFILE_KEY, PROFILES_KEY, PROXY_ENABLED_KEY},
    storage::{StorageChanges, StoredValues},
};
use serde_json::json;

pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

#[derive(Default)]
pub struct RecordingApplier {
    calls: Mutex<Vec<ProxySettings>>,
    failing: AtomicBool,
}

impl RecordingApplier {
    pub fn calls(&self) -> Vec<ProxySettings> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<ProxySettings> {
        self.calls.lock().unwrap().last().cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ProxyApplier for RecordingApplier {
    fn apply(&self, settings: ProxySettings) -> BoxFuture<'_, Result<(), String>> {
        self.calls.lock().unwrap().push(settings);
        let result = if self.failing.load(Ordering::SeqCst) {
            Err("platform refused".to_string())
        } else {
            Ok(())
        };
        future::ready(result).boxed()
    }
}

#[derive(Default)]
pub struct RecordingStorage {
    inner: MemoryStorage,
    writes: Mutex<Vec<Vec<String>>>,
    failing_writes: AtomicBool,
}

impl RecordingStorage {
    pub fn with_values(values: StoredValues) -> Self {
        Self {
            inner: MemoryStorage::with_values(values),
            ..Self::default()
        }
    }

    /// Keys of every successful `set` call, in order.
    pub fn writes(&self) -> Vec<Vec<String>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StoredValues {
        self.inner.snapshot()
    }

    pub fn state(&self) -> GlobalState {
        GlobalState::decode(&self.inner.snapshot()).state
    }
}

impl Storage for RecordingStorage {
    fn name(&self) -> &str {
        "recording"
    }

    fn get<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<StoredValues, String>> {
        self.inner.get(keys)
    }

    fn set(&self, values: StoredValues) -> BoxFuture<'_, Result<(), String>> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return future::ready(Err("disk full".to_string())).boxed();
        }
        self.writes
            .lock()
            .unwrap()
            .push(values.keys().cloned().collect());
        self.inner.set(values)
    }

    fn subscribe(&self) -> UnboundedReceiver<StorageChanges> {
        self.inner.subscribe()
    }
}

pub struct Fixture {
    pub storage: Arc<RecordingStorage>,
    pub applier: Arc<RecordingApplier>,
    pub store: ProfileStore,
}

impl Fixture {
    pub fn new(values: StoredValues) -> Self {
        init_logging();
        let storage = Arc::new(RecordingStorage::with_values(values));
        let applier = Arc::new(RecordingApplier::default());
        let activation = ProxyActivation::new(
            storage.clone() as Arc<dyn Storage>,
            applier.clone() as Arc<dyn ProxyApplier>,
        );
        Self {
            storage,
            applier,
            store: ProfileStore::new(activation),
        }
    }

    pub fn empty() -> Self {
        Self::new(StoredValues::new())
    }

    pub fn activation(&self) -> &ProxyActivation {
        self.store.activation()
    }
}

pub fn profile(id: &str, host: &str, port: &str, bypass: &[&str]) -> ProxyProfile {
    ProxyProfile {
        id: ProfileId::new(id),
        name: format!("Profile {id}"),
        host: host.into(),
        port: port.into(),
        bypass_list: bypass.iter().map(|pattern| pattern.to_string()).collect(),
    }
}

pub fn seeded(profiles: &[ProxyProfile], current: &str, enabled: bool) -> StoredValues {
    let mut values = StoredValues::new();
    values.insert(
        PROFILES_KEY.into(),
        serde_json::to_value(profiles).unwrap(),
    );
    values.insert(CURRENT_PROFILE_KEY.into(), json!(current));
    values.insert(PROXY_ENABLED_KEY.into(), json!(enabled));
    values
}

/// Profiles `a` (127.0.0.1:8998, bypass localhost) and `b` (10.0.0.1:3128).
pub fn two_profiles(current: &str, enabled: bool) -> StoredValues {
    seeded(
        &[
            profile("a", "127.0.0.1", "8998", &["localhost"]),
            profile("b", "10.0.0.1", "3128", &[]),
        ],
        current,
        enabled,
    )
}

pub fn fixed(host: &str, port: u16, bypass: &[&str]) -> ProxySettings {
    ProxySettings::Fixed {
        host: host.into(),
        port,
        bypass_list: bypass.iter().map(|pattern| pattern.to_string()).collect(),
    }
}
