use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use futures::{
    FutureExt,
    channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded},
    future::{self, BoxFuture},
};
use serde_json::Value;

pub type StoredValues = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub old_value: Option<Value>,
    pub new_value: Value,
}

/// Keys whose value actually changed in one `set` call.
pub type StorageChanges = BTreeMap<String, ValueChange>;

/// Asynchronous key-value store shared by every surface.
///
/// Keys written in a single `set` call form one logical update and are
/// announced to subscribers as one [`StorageChanges`] batch. Nothing beyond
/// that is transactional.
pub trait Storage: Send + Sync {
    fn name(&self) -> &str;

    /// Absent keys are simply missing from the returned map.
    fn get<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<StoredValues, String>>;

    /// A null value removes the key.
    fn set(&self, values: StoredValues) -> BoxFuture<'_, Result<(), String>>;

    fn subscribe(&self) -> UnboundedReceiver<StorageChanges>;
}

#[derive(Default)]
struct ChangeNotifier {
    subscribers: Mutex<Vec<UnboundedSender<StorageChanges>>>,
}

impl ChangeNotifier {
    fn subscribe(&self) -> UnboundedReceiver<StorageChanges> {
        let (sender, receiver) = unbounded();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(sender),
            Err(_) => log::warn!("[storage] subscriber list poisoned, subscription dropped"),
        }
        receiver
    }

    fn notify(&self, changes: StorageChanges) {
        if changes.is_empty() {
            return;
        }
        let Ok(mut subscribers) = self.subscribers.lock() else {
            log::warn!("[storage] subscriber list poisoned, change not announced");
            return;
        };
        subscribers.retain(|subscriber| subscriber.unbounded_send(changes.clone()).is_ok());
        log::debug!(
            "[storage] announced {:?} to {} subscribers",
            changes.keys().collect::<Vec<_>>(),
            subscribers.len()
        );
    }
}

/// Writes `values` into `current` and returns only the entries that differ.
/// A null value removes the key.
fn merge_values(current: &mut StoredValues, values: StoredValues) -> StorageChanges {
    let mut changes = StorageChanges::new();
    for (key, new_value) in values {
        if new_value.is_null() {
            if let Some(old_value) = current.remove(&key) {
                changes.insert(
                    key,
                    ValueChange {
                        old_value: Some(old_value),
                        new_value,
                    },
                );
            }
            continue;
        }
        let old_value = current.insert(key.clone(), new_value.clone());
        if old_value.as_ref() != Some(&new_value) {
            changes.insert(
                key,
                ValueChange {
                    old_value,
                    new_value,
                },
            );
        }
    }
    changes
}

/// Makes `seen` equal to `current`, reporting removed keys as well.
fn replace_values(seen: &mut StoredValues, mut current: StoredValues) -> StorageChanges {
    for key in seen.keys() {
        if !current.contains_key(key) {
            current.insert(key.clone(), Value::Null);
        }
    }
    merge_values(seen, current)
}

fn select_keys(values: &StoredValues, keys: &[&str]) -> StoredValues {
    keys.iter()
        .filter_map(|key| {
            values
                .get(*key)
                .map(|value| (key.to_string(), value.clone()))
        })
        .collect()
}

/// In-process store, the backing used when surfaces share one process.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<StoredValues>,
    notifier: ChangeNotifier,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: StoredValues) -> Self {
        Self {
            values: Mutex::new(values),
            notifier: ChangeNotifier::default(),
        }
    }

    pub fn snapshot(&self) -> StoredValues {
        self.values
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    fn get<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<StoredValues, String>> {
        let result = self
            .values
            .lock()
            .map(|values| select_keys(&values, keys))
            .map_err(|_| "memory storage lock poisoned".to_string());
        future::ready(result).boxed()
    }

    fn set(&self, values: StoredValues) -> BoxFuture<'_, Result<(), String>> {
        let result = match self.values.lock() {
            Ok(mut current) => Ok(merge_values(&mut current, values)),
            Err(_) => Err("memory storage lock poisoned".to_string()),
        };
        let result = result.map(|changes| self.notifier.notify(changes));
        future::ready(result).boxed()
    }

    fn subscribe(&self) -> UnboundedReceiver<StorageChanges> {
        self.notifier.subscribe()
    }
}

/// TOML file store. Writes made through this instance are announced right
/// away; writes by other processes are picked up by [`FileStorage::refresh`].
pub struct FileStorage {
    path: PathBuf,
    last_seen: Mutex<StoredValues>,
    notifier: ChangeNotifier,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        log::info!("[storage] using state file {}", path.display());
        let storage = Self {
            path,
            last_seen: Mutex::new(StoredValues::new()),
            notifier: ChangeNotifier::default(),
        };
        match storage.read_all() {
            Ok(values) => {
                if let Ok(mut last_seen) = storage.last_seen.lock() {
                    *last_seen = values;
                }
            }
            Err(error) => log::warn!("[storage] {error}"),
        }
        storage
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<StoredValues, String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("[storage] no state file at {}", self.path.display());
                return Ok(StoredValues::new());
            }
            Err(error) => {
                return Err(format!("Failed to read {}: {error}", self.path.display()));
            }
        };
        toml::from_str(&content)
            .map_err(|error| format!("Failed to parse {}: {error}", self.path.display()))
    }

    fn write_all(&self, values: &StoredValues) -> Result<(), String> {
        if let Some(parent) = self.path.parent()
            && let Err(error) = std::fs::create_dir_all(parent)
        {
            return Err(format!(
                "Failed to create state directory {}: {error}",
                parent.display()
            ));
        }
        let content = toml::to_string_pretty(values)
            .map_err(|error| format!("Failed to serialize state: {error}"))?;
        std::fs::write(&self.path, content)
            .map_err(|error| format!("Failed to write {}: {error}", self.path.display()))
    }

    fn set_blocking(&self, values: StoredValues) -> Result<StorageChanges, String> {
        let mut last_seen = self
            .last_seen
            .lock()
            .map_err(|_| "file storage lock poisoned".to_string())?;
        let mut current = self.read_all()?;
        if !merge_values(&mut current, values).is_empty() {
            self.write_all(&current)?;
        }
        // Relative to what subscribers last heard, so external writes read
        // back here are announced too.
        Ok(replace_values(&mut last_seen, current))
    }

    /// Re-reads the file and announces keys that changed since this instance
    /// last read or wrote it. Returns how many keys changed.
    pub fn refresh(&self) -> Result<usize, String> {
        let changes = {
            let mut last_seen = self
                .last_seen
                .lock()
                .map_err(|_| "file storage lock poisoned".to_string())?;
            let current = self.read_all()?;
            replace_values(&mut last_seen, current)
        };

        let count = changes.len();
        if count > 0 {
            log::info!("[storage] {count} keys changed in {}", self.path.display());
        }
        self.notifier.notify(changes);
        Ok(count)
    }
}

impl Storage for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    fn get<'a>(&'a self, keys: &'a [&'a str]) -> BoxFuture<'a, Result<StoredValues, String>> {
        let result = self.read_all().map(|values| select_keys(&values, keys));
        future::ready(result).boxed()
    }

    fn set(&self, values: StoredValues) -> BoxFuture<'_, Result<(), String>> {
        let result = self
            .set_blocking(values)
            .map(|changes| self.notifier.notify(changes));
        future::ready(result).boxed()
    }

    fn subscribe(&self) -> UnboundedReceiver<StorageChanges> {
        self.notifier.subscribe()
    }
}
