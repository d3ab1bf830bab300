use crate::{
    activation::ActivationState,
    error::ProxyError,
    profile::{ProfileFields, ProfileId, ProxyProfile, bypass_text, parse_bypass_text},
    state::GlobalState,
    store::ProfileStore,
    sync::{StateReceiver, SyncChannel},
    toggle_state::ToggleState,
};

/// A surface's end of the [`SyncChannel`].
struct Updates {
    channel: SyncChannel,
    receiver: StateReceiver,
}

impl Updates {
    fn new(channel: &SyncChannel) -> Self {
        Self {
            channel: channel.clone(),
            receiver: channel.subscribe(),
        }
    }

    /// Latest state delivered since the previous call, if any.
    fn latest(&mut self) -> Option<GlobalState> {
        self.channel.pump_pending();
        let mut latest = None;
        while let Ok(Some(state)) = self.receiver.try_next() {
            latest = Some(state);
        }
        latest
    }
}

/// Compact panel: current target, an on/off switch and a profile selector.
pub struct QuickToggle {
    store: ProfileStore,
    updates: Updates,
    state: Option<GlobalState>,
    status: ToggleState,
}

impl QuickToggle {
    pub fn new(store: ProfileStore, channel: &SyncChannel) -> Self {
        let mut toggle = Self {
            store,
            updates: Updates::new(channel),
            state: None,
            status: ToggleState::Off,
        };
        toggle.sync();
        toggle
    }

    /// Applies whatever the channel delivered since the last call.
    pub fn sync(&mut self) -> bool {
        match self.updates.latest() {
            Some(state) => {
                self.apply_notification(state);
                true
            }
            None => false,
        }
    }

    pub fn apply_notification(&mut self, state: GlobalState) {
        if !self.status.is_busy() && !matches!(self.status, ToggleState::Error(_)) {
            self.status = ActivationState::from(state.proxy_enabled()).into();
        }
        self.state = Some(state);
    }

    pub fn state(&self) -> Option<&GlobalState> {
        self.state.as_ref()
    }

    pub fn status(&self) -> &ToggleState {
        &self.status
    }

    /// Switch position, taken from the persisted state rather than from the
    /// last command so a failed disable never shows as off.
    pub fn is_checked(&self) -> bool {
        self.state.as_ref().is_some_and(GlobalState::proxy_enabled)
    }

    pub fn profiles(&self) -> &[ProxyProfile] {
        self.state
            .as_ref()
            .map(GlobalState::profiles)
            .unwrap_or_default()
    }

    pub fn target_label(&self) -> Option<String> {
        self.state
            .as_ref()
            .map(|state| state.current_profile().target_label())
    }

    pub async fn toggle(&mut self) -> Result<ActivationState, ProxyError> {
        self.sync();
        self.status = if self.is_checked() {
            ToggleState::Disabling
        } else {
            ToggleState::Enabling
        };

        let activation = self.store.activation().clone();
        let result = if self.is_checked() {
            activation.toggle_off().await
        } else {
            activation.toggle_on().await
        };

        self.status = match &result {
            Ok(state) => (*state).into(),
            Err(error) => ToggleState::Error(error.to_string()),
        };
        self.sync();
        result
    }

    pub async fn select_profile(&mut self, id: &ProfileId) -> Result<(), ProxyError> {
        let result = self.store.set_current(id).await;
        if let Err(error) = &result {
            self.status = ToggleState::Error(error.to_string());
        }
        self.sync();
        result
    }

    pub fn clear_error(&mut self) {
        if matches!(self.status, ToggleState::Error(_)) {
            self.status = ActivationState::from(self.is_checked()).into();
        }
    }
}

/// Unsaved contents of the settings form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileDraft {
    editing: Option<ProxyProfile>,
    pub name: String,
    pub host: String,
    pub port: String,
    pub bypass_text: String,
}

impl ProfileDraft {
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn from_profile(profile: &ProxyProfile) -> Self {
        Self {
            editing: Some(profile.clone()),
            name: profile.name.clone(),
            host: profile.host.clone(),
            port: profile.port.clone(),
            bypass_text: bypass_text(&profile.bypass_list),
        }
    }

    pub fn editing(&self) -> Option<&ProfileId> {
        self.editing.as_ref().map(|profile| &profile.id)
    }

    pub fn fields(&self) -> ProfileFields {
        ProfileFields {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port.clone(),
            bypass_list: parse_bypass_text(&self.bypass_text),
        }
    }
}

/// Full settings surface: profile list, form and bypass-list editor.
pub struct SettingsPage {
    store: ProfileStore,
    updates: Updates,
    state: Option<GlobalState>,
    draft: ProfileDraft,
    last_error: Option<String>,
}

impl SettingsPage {
    pub fn new(store: ProfileStore, channel: &SyncChannel) -> Self {
        let mut page = Self {
            store,
            updates: Updates::new(channel),
            state: None,
            draft: ProfileDraft::blank(),
            last_error: None,
        };
        page.sync();
        page
    }

    /// Applies whatever the channel delivered since the last call.
    pub fn sync(&mut self) -> bool {
        match self.updates.latest() {
            Some(state) => {
                self.apply_notification(state);
                true
            }
            None => false,
        }
    }

    /// Replaces the local copy. A form editing a profile that changed
    /// elsewhere is reloaded; one editing a deleted profile is reset.
    pub fn apply_notification(&mut self, state: GlobalState) {
        if let Some(base) = &self.draft.editing {
            match state.profile(&base.id) {
                None => {
                    log::warn!("[settings] profile {} was deleted elsewhere", base.id);
                    self.draft = ProfileDraft::blank();
                }
                Some(stored) if stored != base => {
                    log::info!("[settings] profile {} changed elsewhere, reloading", base.id);
                    self.draft = ProfileDraft::from_profile(stored);
                }
                Some(_) => {}
            }
        }
        self.state = Some(state);
    }

    pub fn state(&self) -> Option<&GlobalState> {
        self.state.as_ref()
    }

    pub fn draft(&self) -> &ProfileDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut ProfileDraft {
        &mut self.draft
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn new_profile(&mut self) {
        self.draft = ProfileDraft::blank();
    }

    pub fn edit(&mut self, id: &ProfileId) -> Result<(), ProxyError> {
        let profile = self
            .state
            .as_ref()
            .and_then(|state| state.profile(id))
            .ok_or_else(|| ProxyError::NotFound(id.clone()))?;
        self.draft = ProfileDraft::from_profile(profile);
        Ok(())
    }

    fn record<T>(&mut self, result: Result<T, ProxyError>) -> Result<T, ProxyError> {
        self.last_error = result.as_ref().err().map(ToString::to_string);
        self.sync();
        result
    }

    /// Creates or updates the profile in the form. On success the form
    /// keeps editing the saved profile.
    ///
    /// A failed re-apply comes after the profile was written, so the form
    /// is bound to the saved profile in that case too and a retry updates it
    /// instead of creating another one.
    pub async fn save(&mut self) -> Result<ProfileId, ProxyError> {
        let fields = self.draft.fields();
        let editing = self.draft.editing().cloned();
        let result = match &editing {
            Some(id) => self.store.update(id, fields).await.map(|()| id.clone()),
            None => self.store.create(fields).await,
        };
        let result = self.record(result);

        let saved = match (&result, editing) {
            (Ok(id), _) => Some(id.clone()),
            (Err(ProxyError::Apply(_)), Some(id)) => Some(id),
            // A successful create always makes the new profile current.
            (Err(ProxyError::Apply(_)), None) => match self.store.current().await {
                Ok(profile) => Some(profile.id),
                Err(error) => {
                    log::warn!("[settings] cannot find the profile just created: {error}");
                    None
                }
            },
            (Err(_), _) => None,
        };
        if let Some(id) = saved {
            match self.state.as_ref().and_then(|state| state.profile(&id)) {
                Some(profile) => self.draft = ProfileDraft::from_profile(profile),
                None => {
                    if let Ok(profile) = self.store.get(&id).await {
                        self.draft = ProfileDraft::from_profile(&profile);
                    }
                }
            }
        }
        result
    }

    pub async fn delete(&mut self, id: &ProfileId) -> Result<(), ProxyError> {
        let result = self.store.delete(id).await;
        self.record(result)
    }

    pub async fn select(&mut self, id: &ProfileId) -> Result<(), ProxyError> {
        let result = self.store.set_current(id).await;
        self.record(result)
    }
}
