use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::ProxyError,
    profile::{ProfileId, ProxyProfile, parse_port},
    storage::{Storage, StoredValues},
};

pub const PROFILES_KEY: &str = "proxyProfiles";
pub const CURRENT_PROFILE_KEY: &str = "currentProfileId";
pub const PROXY_ENABLED_KEY: &str = "proxyEnabled";

/// Single-profile schema written by early releases.
pub const LEGACY_CONFIG_KEY: &str = "proxyConfig";
pub const LEGACY_BYPASS_KEY: &str = "bypassList";

pub const STATE_KEYS: [&str; 3] = [PROFILES_KEY, CURRENT_PROFILE_KEY, PROXY_ENABLED_KEY];
const LOAD_KEYS: [&str; 5] = [
    PROFILES_KEY,
    CURRENT_PROFILE_KEY,
    PROXY_ENABLED_KEY,
    LEGACY_CONFIG_KEY,
    LEGACY_BYPASS_KEY,
];

#[derive(Deserialize)]
struct LegacyConfig {
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: Value,
}

/// The persisted configuration every surface reads and writes.
///
/// Fields are private so the invariants hold after every mutation: the
/// profile list is never empty, and the current id always names one of
/// its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalState {
    profiles: Vec<ProxyProfile>,
    current_profile_id: ProfileId,
    proxy_enabled: bool,
}

/// Result of decoding stored values. `repaired` lists the keys whose stored
/// form did not satisfy the invariants and must be written back; `obsolete`
/// lists legacy keys still present that should be removed.
pub struct DecodedState {
    pub state: GlobalState,
    pub repaired: Vec<&'static str>,
    pub obsolete: Vec<&'static str>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::first_run()
    }
}

impl GlobalState {
    pub fn first_run() -> Self {
        let profile = ProxyProfile::default_profile();
        Self {
            current_profile_id: profile.id.clone(),
            profiles: vec![profile],
            proxy_enabled: false,
        }
    }

    pub fn profiles(&self) -> &[ProxyProfile] {
        &self.profiles
    }

    pub fn current_profile_id(&self) -> &ProfileId {
        &self.current_profile_id
    }

    pub fn proxy_enabled(&self) -> bool {
        self.proxy_enabled
    }

    pub fn profile(&self, id: &ProfileId) -> Option<&ProxyProfile> {
        self.profiles.iter().find(|profile| &profile.id == id)
    }

    pub fn contains(&self, id: &ProfileId) -> bool {
        self.profile(id).is_some()
    }

    pub fn current_profile(&self) -> &ProxyProfile {
        // The invariant guarantees a match; the fallback keeps this total.
        self.profile(&self.current_profile_id)
            .unwrap_or(&self.profiles[0])
    }

    pub(crate) fn insert(&mut self, profile: ProxyProfile) {
        self.profiles.push(profile);
    }

    pub(crate) fn replace(&mut self, profile: ProxyProfile) -> Result<(), ProxyError> {
        let slot = self
            .profiles
            .iter_mut()
            .find(|existing| existing.id == profile.id)
            .ok_or_else(|| ProxyError::NotFound(profile.id.clone()))?;
        *slot = profile;
        Ok(())
    }

    /// Removes a profile, moving the current pointer to the first remaining
    /// profile when the removed one was current. Returns whether it moved.
    pub(crate) fn remove(&mut self, id: &ProfileId) -> Result<bool, ProxyError> {
        let position = self
            .profiles
            .iter()
            .position(|profile| &profile.id == id)
            .ok_or_else(|| ProxyError::NotFound(id.clone()))?;
        if self.profiles.len() == 1 {
            return Err(ProxyError::LastProfile);
        }
        self.profiles.remove(position);
        if &self.current_profile_id == id {
            self.current_profile_id = self.profiles[0].id.clone();
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn select(&mut self, id: &ProfileId) -> Result<(), ProxyError> {
        if !self.contains(id) {
            return Err(ProxyError::NotFound(id.clone()));
        }
        self.current_profile_id = id.clone();
        Ok(())
    }

    pub(crate) fn set_proxy_enabled(&mut self, enabled: bool) {
        self.proxy_enabled = enabled;
    }

    pub fn encode_key(&self, key: &str) -> Option<Value> {
        match key {
            PROFILES_KEY => serde_json::to_value(&self.profiles).ok(),
            CURRENT_PROFILE_KEY => Some(Value::String(self.current_profile_id.to_string())),
            PROXY_ENABLED_KEY => Some(Value::Bool(self.proxy_enabled)),
            _ => None,
        }
    }

    /// Stored form of the given keys, ready for a single `set` call.
    pub fn encode(&self, keys: &[&str]) -> StoredValues {
        keys.iter()
            .filter_map(|key| {
                self.encode_key(key)
                    .map(|value| (key.to_string(), value))
            })
            .collect()
    }

    pub fn decode(values: &StoredValues) -> DecodedState {
        let mut repaired = Vec::new();

        let mut profiles = match values.get(PROFILES_KEY) {
            Some(raw) => decode_profiles(raw, &mut repaired),
            None => {
                repaired.push(PROFILES_KEY);
                vec![legacy_profile(values).unwrap_or_else(ProxyProfile::default_profile)]
            }
        };
        if profiles.is_empty() {
            log::warn!("[state] stored profile list is empty, materializing default profile");
            profiles.push(ProxyProfile::default_profile());
            if !repaired.contains(&PROFILES_KEY) {
                repaired.push(PROFILES_KEY);
            }
        }

        let stored_current = values
            .get(CURRENT_PROFILE_KEY)
            .and_then(Value::as_str)
            .map(ProfileId::from);
        let current_profile_id = match stored_current {
            Some(id) if profiles.iter().any(|profile| profile.id == id) => id,
            other => {
                if let Some(id) = other {
                    log::warn!("[state] current profile '{id}' no longer exists");
                }
                repaired.push(CURRENT_PROFILE_KEY);
                profiles[0].id.clone()
            }
        };

        let proxy_enabled = match values.get(PROXY_ENABLED_KEY) {
            Some(Value::Bool(enabled)) => *enabled,
            Some(other) => {
                log::warn!("[state] ignoring non-boolean {PROXY_ENABLED_KEY}: {other}");
                repaired.push(PROXY_ENABLED_KEY);
                false
            }
            None => {
                repaired.push(PROXY_ENABLED_KEY);
                false
            }
        };

        let obsolete = [LEGACY_CONFIG_KEY, LEGACY_BYPASS_KEY]
            .into_iter()
            .filter(|key| values.contains_key(*key))
            .collect();

        DecodedState {
            state: Self {
                profiles,
                current_profile_id,
                proxy_enabled,
            },
            repaired,
            obsolete,
        }
    }

    /// Reads the state, materializing and persisting the default profile on
    /// first run and writing back any repaired keys.
    pub async fn load(storage: &dyn Storage) -> Result<Self, ProxyError> {
        let values = storage
            .get(&LOAD_KEYS)
            .await
            .map_err(ProxyError::Persistence)?;
        let DecodedState {
            state,
            repaired,
            obsolete,
        } = Self::decode(&values);

        if repaired.is_empty() && obsolete.is_empty() {
            return Ok(state);
        }
        if !values.contains_key(PROFILES_KEY) {
            log::info!(
                "[state] first run, initializing with profile '{}'",
                state.current_profile().name
            );
        } else if !repaired.is_empty() {
            log::warn!("[state] repairing stored keys {repaired:?}");
        }
        let mut update = state.encode(&repaired);
        for key in obsolete {
            log::info!("[state] removing legacy key {key}");
            update.insert(key.to_string(), Value::Null);
        }
        storage
            .set(update)
            .await
            .map_err(ProxyError::Persistence)?;
        Ok(state)
    }

    pub async fn persist(&self, storage: &dyn Storage, keys: &[&str]) -> Result<(), ProxyError> {
        storage
            .set(self.encode(keys))
            .await
            .map_err(ProxyError::Persistence)
    }
}

fn decode_profiles(raw: &Value, repaired: &mut Vec<&'static str>) -> Vec<ProxyProfile> {
    let Some(entries) = raw.as_array() else {
        log::warn!("[state] {PROFILES_KEY} is not an array, discarding");
        repaired.push(PROFILES_KEY);
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut profiles = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<ProxyProfile>(entry.clone()) {
            Ok(profile) if seen.insert(profile.id.clone()) => profiles.push(profile),
            Ok(profile) => {
                log::warn!("[state] dropping duplicate profile id '{}'", profile.id);
                if !repaired.contains(&PROFILES_KEY) {
                    repaired.push(PROFILES_KEY);
                }
            }
            Err(error) => {
                log::warn!("[state] dropping unreadable profile entry: {error}");
                if !repaired.contains(&PROFILES_KEY) {
                    repaired.push(PROFILES_KEY);
                }
            }
        }
    }
    profiles
}

fn legacy_profile(values: &StoredValues) -> Option<ProxyProfile> {
    let legacy: LegacyConfig =
        serde_json::from_value(values.get(LEGACY_CONFIG_KEY)?.clone()).ok()?;
    let port = match &legacy.port {
        Value::String(port) => port.clone(),
        Value::Number(port) => port.to_string(),
        _ => return None,
    };
    if legacy.host.trim().is_empty() || parse_port(&port).is_err() {
        return None;
    }

    let mut profile = ProxyProfile::default_profile();
    profile.host = legacy.host.trim().to_string();
    profile.port = port.trim().to_string();
    if let Some(patterns) = values.get(LEGACY_BYPASS_KEY).and_then(Value::as_array) {
        profile.bypass_list = patterns
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|pattern| !pattern.is_empty())
            .map(str::to_string)
            .collect();
    }
    log::info!(
        "[state] migrating legacy proxy configuration {}",
        profile.target_label()
    );
    Some(profile)
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use serde_json::json;

    use super::*;
    use crate::storage::FileStorage;

    fn stored(pairs: &[(&str, Value)]) -> StoredValues {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn profile(id: &str, host: &str) -> ProxyProfile {
        ProxyProfile {
            id: ProfileId::new(id),
            name: id.to_uppercase(),
            host: host.into(),
            port: "3128".into(),
            bypass_list: Vec::new(),
        }
    }

    #[test]
    fn empty_store_materializes_default_profile() {
        let decoded = GlobalState::decode(&StoredValues::new());

        assert_eq!(decoded.state, GlobalState::first_run());
        assert_eq!(decoded.state.profiles().len(), 1);
        assert_eq!(decoded.state.current_profile().target_label(), "127.0.0.1:8998");
        assert!(!decoded.state.proxy_enabled());
        assert_eq!(decoded.repaired, STATE_KEYS.to_vec());
    }

    #[test]
    fn consistent_state_needs_no_repair() {
        let state = GlobalState {
            profiles: vec![profile("a", "10.0.0.1"), profile("b", "10.0.0.2")],
            current_profile_id: ProfileId::new("b"),
            proxy_enabled: true,
        };

        let decoded = GlobalState::decode(&state.encode(&STATE_KEYS));

        assert!(decoded.repaired.is_empty());
        assert_eq!(decoded.state, state);
    }

    #[test]
    fn schema_uses_camel_case_keys_and_string_port() {
        let state = GlobalState::first_run();
        let encoded = state.encode(&STATE_KEYS);

        assert_eq!(
            encoded[PROFILES_KEY],
            json!([{
                "id": "default",
                "name": "Default",
                "host": "127.0.0.1",
                "port": "8998",
                "bypassList": ["localhost", "127.0.0.1"],
            }])
        );
        assert_eq!(encoded[CURRENT_PROFILE_KEY], json!("default"));
        assert_eq!(encoded[PROXY_ENABLED_KEY], json!(false));
    }

    #[test]
    fn dangling_current_id_falls_back_to_first_profile() {
        let values = stored(&[
            (
                PROFILES_KEY,
                serde_json::to_value(vec![profile("a", "h"), profile("b", "h")]).unwrap(),
            ),
            (CURRENT_PROFILE_KEY, json!("gone")),
            (PROXY_ENABLED_KEY, json!(false)),
        ]);

        let decoded = GlobalState::decode(&values);

        assert_eq!(decoded.state.current_profile_id().as_str(), "a");
        assert_eq!(decoded.repaired, vec![CURRENT_PROFILE_KEY]);
    }

    #[test]
    fn duplicate_ids_keep_first_occurrence() {
        let values = stored(&[
            (
                PROFILES_KEY,
                serde_json::to_value(vec![profile("a", "first"), profile("a", "second")]).unwrap(),
            ),
            (CURRENT_PROFILE_KEY, json!("a")),
            (PROXY_ENABLED_KEY, json!(true)),
        ]);

        let decoded = GlobalState::decode(&values);

        assert_eq!(decoded.state.profiles().len(), 1);
        assert_eq!(decoded.state.current_profile().host, "first");
        assert_eq!(decoded.repaired, vec![PROFILES_KEY]);
    }

    #[test]
    fn legacy_single_profile_schema_is_migrated() {
        let values = stored(&[
            (LEGACY_CONFIG_KEY, json!({"host": "192.168.1.5", "port": "8080"})),
            (LEGACY_BYPASS_KEY, json!(["localhost", " ", "*.lan"])),
        ]);

        let decoded = GlobalState::decode(&values);
        let current = decoded.state.current_profile();

        assert_eq!(current.host, "192.168.1.5");
        assert_eq!(current.port, "8080");
        assert_eq!(current.bypass_list, vec!["localhost", "*.lan"]);
        assert!(decoded.repaired.contains(&PROFILES_KEY));
        assert_eq!(decoded.obsolete, vec![LEGACY_CONFIG_KEY, LEGACY_BYPASS_KEY]);
    }

    #[test]
    fn load_drops_legacy_keys_in_the_repair_write() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("state.toml");
        let storage = FileStorage::new(path.clone());
        block_on(storage.set(stored(&[
            (LEGACY_CONFIG_KEY, json!({"host": "192.168.1.5", "port": 8080})),
            (LEGACY_BYPASS_KEY, json!(["localhost"])),
        ])))
        .unwrap();
        let mut changes = storage.subscribe();

        let state = block_on(GlobalState::load(&storage)).unwrap();

        assert_eq!(state.current_profile().target_label(), "192.168.1.5:8080");
        let batch = changes.try_next().unwrap().unwrap();
        assert!(batch.contains_key(PROFILES_KEY));
        assert!(batch.contains_key(LEGACY_CONFIG_KEY));
        assert!(changes.try_next().is_err());

        let on_disk: StoredValues =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            on_disk.keys().map(String::as_str).collect::<Vec<_>>(),
            vec![CURRENT_PROFILE_KEY, PROFILES_KEY, PROXY_ENABLED_KEY]
        );

        let reloaded = block_on(GlobalState::load(&storage)).unwrap();
        assert_eq!(reloaded, state);
        assert!(changes.try_next().is_err());
    }

    #[test]
    fn removing_current_moves_pointer_to_first_remaining() {
        let mut state = GlobalState {
            profiles: vec![profile("a", "h"), profile("b", "h"), profile("c", "h")],
            current_profile_id: ProfileId::new("b"),
            proxy_enabled: false,
        };

        assert_eq!(state.remove(&ProfileId::new("b")), Ok(true));
        assert_eq!(state.current_profile_id().as_str(), "a");
        assert_eq!(state.remove(&ProfileId::new("c")), Ok(false));
        assert_eq!(state.remove(&ProfileId::new("a")), Err(ProxyError::LastProfile));
        assert_eq!(
            state.remove(&ProfileId::new("zzz")),
            Err(ProxyError::NotFound(ProfileId::new("zzz")))
        );
    }
}
