use std::sync::Arc;

use crate::{
    activation::ProxyActivation,
    error::ProxyError,
    profile::{ProfileFields, ProfileId, ProxyProfile},
    state::{CURRENT_PROFILE_KEY, GlobalState, PROFILES_KEY},
    storage::Storage,
};

/// CRUD over the stored profiles and the current-profile pointer.
///
/// Every command re-reads the persisted state, mutates it and writes back
/// only the keys it changed, so concurrent surfaces overwrite each other
/// per key (last write wins) rather than per document.
#[derive(Clone)]
pub struct ProfileStore {
    storage: Arc<dyn Storage>,
    activation: ProxyActivation,
}

impl ProfileStore {
    pub fn new(activation: ProxyActivation) -> Self {
        Self {
            storage: activation.storage().clone(),
            activation,
        }
    }

    pub fn activation(&self) -> &ProxyActivation {
        &self.activation
    }

    pub async fn state(&self) -> Result<GlobalState, ProxyError> {
        GlobalState::load(self.storage.as_ref()).await
    }

    pub async fn list(&self) -> Result<Vec<ProxyProfile>, ProxyError> {
        Ok(self.state().await?.profiles().to_vec())
    }

    pub async fn get(&self, id: &ProfileId) -> Result<ProxyProfile, ProxyError> {
        self.state()
            .await?
            .profile(id)
            .cloned()
            .ok_or_else(|| ProxyError::NotFound(id.clone()))
    }

    pub async fn current(&self) -> Result<ProxyProfile, ProxyError> {
        Ok(self.state().await?.current_profile().clone())
    }

    /// Adds a profile and makes it current.
    pub async fn create(&self, fields: ProfileFields) -> Result<ProfileId, ProxyError> {
        let mut state = self.state().await?;
        let profile = fields.into_profile(ProfileId::fresh(state.profiles()))?;
        let id = profile.id.clone();

        state.insert(profile);
        state.select(&id)?;
        state
            .persist(self.storage.as_ref(), &[PROFILES_KEY, CURRENT_PROFILE_KEY])
            .await?;
        log::info!(
            "[profiles] created '{}' ({id}) at {}",
            state.current_profile().name,
            state.current_profile().target_label()
        );

        self.reapply_if_enabled(&state).await?;
        Ok(id)
    }

    pub async fn update(&self, id: &ProfileId, fields: ProfileFields) -> Result<(), ProxyError> {
        let mut state = self.state().await?;
        if !state.contains(id) {
            return Err(ProxyError::NotFound(id.clone()));
        }
        let profile = fields.into_profile(id.clone())?;

        state.replace(profile)?;
        state.persist(self.storage.as_ref(), &[PROFILES_KEY]).await?;
        log::info!("[profiles] updated {id}");

        if state.current_profile_id() == id {
            self.reapply_if_enabled(&state).await?;
        }
        Ok(())
    }

    /// Removing the current profile moves the pointer to the first remaining
    /// profile; both keys are written in one `set` call.
    pub async fn delete(&self, id: &ProfileId) -> Result<(), ProxyError> {
        let mut state = self.state().await?;
        let moved = state.remove(id)?;

        if moved {
            state
                .persist(self.storage.as_ref(), &[PROFILES_KEY, CURRENT_PROFILE_KEY])
                .await?;
            log::info!(
                "[profiles] deleted current profile {id}, current is now {}",
                state.current_profile_id()
            );
            self.reapply_if_enabled(&state).await?;
        } else {
            state.persist(self.storage.as_ref(), &[PROFILES_KEY]).await?;
            log::info!("[profiles] deleted {id}");
        }
        Ok(())
    }

    pub async fn set_current(&self, id: &ProfileId) -> Result<(), ProxyError> {
        let mut state = self.state().await?;
        state.select(id)?;
        state
            .persist(self.storage.as_ref(), &[CURRENT_PROFILE_KEY])
            .await?;
        log::info!("[profiles] current profile set to {id}");

        self.reapply_if_enabled(&state).await
    }

    /// Converts the settings page's free-text editor into a bypass list.
    pub fn parse_bypass_text(raw: &str) -> Vec<String> {
        crate::profile::parse_bypass_text(raw)
    }

    async fn reapply_if_enabled(&self, state: &GlobalState) -> Result<(), ProxyError> {
        if !state.proxy_enabled() {
            return Ok(());
        }
        self.activation
            .reapply_on_switch(state.current_profile())
            .await
    }
}
