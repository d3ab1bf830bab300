use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{
    configuration::StartupPolicy,
    error::ProxyError,
    profile::ProxyProfile,
    state::{GlobalState, PROXY_ENABLED_KEY},
    storage::Storage,
};

/// What the platform is asked to enforce.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ProxySettings {
    Fixed {
        host: String,
        port: u16,
        #[serde(rename = "bypassList")]
        bypass_list: Vec<String>,
    },
    Direct,
}

impl ProxySettings {
    pub fn for_profile(profile: &ProxyProfile) -> Result<Self, ProxyError> {
        let port = crate::profile::parse_port(&profile.port)?;
        Ok(Self::Fixed {
            host: profile.host.clone(),
            port,
            bypass_list: profile.bypass_list.clone(),
        })
    }
}

impl fmt::Display for ProxySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed {
                host,
                port,
                bypass_list,
            } => write!(f, "fixed {host}:{port} (bypass {})", bypass_list.len()),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// The platform capability that actually routes traffic.
pub trait ProxyApplier: Send + Sync {
    fn apply(&self, settings: ProxySettings) -> BoxFuture<'_, Result<(), String>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationState {
    Disabled,
    Enabled,
}

impl ActivationState {
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Disabled => "OFF",
            Self::Enabled => "ON",
        }
    }
}

impl From<bool> for ActivationState {
    fn from(enabled: bool) -> Self {
        if enabled { Self::Enabled } else { Self::Disabled }
    }
}

/// Enabled/disabled state machine. The persisted `proxyEnabled` flag is the
/// state; a transition is only persisted after the platform accepted it.
#[derive(Clone)]
pub struct ProxyActivation {
    storage: Arc<dyn Storage>,
    applier: Arc<dyn ProxyApplier>,
}

impl ProxyActivation {
    pub fn new(storage: Arc<dyn Storage>, applier: Arc<dyn ProxyApplier>) -> Self {
        Self { storage, applier }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub async fn state(&self) -> Result<ActivationState, ProxyError> {
        let state = GlobalState::load(self.storage.as_ref()).await?;
        Ok(state.proxy_enabled().into())
    }

    async fn apply(&self, settings: ProxySettings) -> Result<(), ProxyError> {
        log::info!("[activation] applying {settings}");
        self.applier.apply(settings).await.map_err(|detail| {
            log::warn!("[activation] apply failed: {detail}");
            ProxyError::Apply(detail)
        })
    }

    /// Routes traffic through the current profile. Already enabled means the
    /// current profile is applied again.
    pub async fn toggle_on(&self) -> Result<ActivationState, ProxyError> {
        let mut state = GlobalState::load(self.storage.as_ref()).await?;
        let settings = ProxySettings::for_profile(state.current_profile())?;
        self.apply(settings).await?;

        if state.proxy_enabled() {
            return Ok(ActivationState::Enabled);
        }
        state.set_proxy_enabled(true);
        if let Err(error) = state.persist(self.storage.as_ref(), &[PROXY_ENABLED_KEY]).await {
            log::warn!("[activation] could not persist enabled state, reverting to direct");
            if let Err(rollback) = self.apply(ProxySettings::Direct).await {
                log::error!("[activation] rollback to direct failed: {rollback}");
            }
            return Err(error);
        }
        log::info!(
            "[activation] proxy enabled via '{}'",
            state.current_profile().name
        );
        Ok(ActivationState::Enabled)
    }

    pub async fn toggle_off(&self) -> Result<ActivationState, ProxyError> {
        let mut state = GlobalState::load(self.storage.as_ref()).await?;
        self.apply(ProxySettings::Direct).await?;

        if !state.proxy_enabled() {
            return Ok(ActivationState::Disabled);
        }
        state.set_proxy_enabled(false);
        if let Err(error) = state.persist(self.storage.as_ref(), &[PROXY_ENABLED_KEY]).await {
            log::warn!("[activation] could not persist disabled state, restoring proxy");
            match ProxySettings::for_profile(state.current_profile()) {
                Ok(settings) => {
                    if let Err(rollback) = self.apply(settings).await {
                        log::error!("[activation] rollback to fixed proxy failed: {rollback}");
                    }
                }
                Err(rollback) => log::error!("[activation] cannot restore proxy: {rollback}"),
            }
            return Err(error);
        }
        log::info!("[activation] proxy disabled");
        Ok(ActivationState::Disabled)
    }

    pub async fn toggle(&self) -> Result<ActivationState, ProxyError> {
        if self.state().await?.is_enabled() {
            self.toggle_off().await
        } else {
            self.toggle_on().await
        }
    }

    /// Enforces a profile that just became (or stayed) current while the
    /// proxy is enabled. A failure leaves `proxyEnabled` untouched.
    pub async fn reapply_on_switch(&self, profile: &ProxyProfile) -> Result<(), ProxyError> {
        log::info!(
            "[activation] current profile is now '{}' ({}), re-applying",
            profile.name,
            profile.target_label()
        );
        self.apply(ProxySettings::for_profile(profile)?).await
    }

    /// Cold-start handling, run once per session before any surface acts.
    pub async fn initialize(&self, policy: StartupPolicy) -> Result<ActivationState, ProxyError> {
        let mut state = GlobalState::load(self.storage.as_ref()).await?;
        log::info!(
            "[startup] policy={}, persisted proxyEnabled={}",
            policy.label(),
            state.proxy_enabled()
        );

        match policy {
            StartupPolicy::Reset => {
                self.apply(ProxySettings::Direct).await?;
                if state.proxy_enabled() {
                    state.set_proxy_enabled(false);
                    state
                        .persist(self.storage.as_ref(), &[PROXY_ENABLED_KEY])
                        .await?;
                }
                Ok(ActivationState::Disabled)
            }
            StartupPolicy::Restore if state.proxy_enabled() => {
                let applied = match ProxySettings::for_profile(state.current_profile()) {
                    Ok(settings) => self.apply(settings).await,
                    Err(error) => Err(error),
                };
                if let Err(error) = applied {
                    log::warn!("[startup] could not restore proxy, marking disabled");
                    state.set_proxy_enabled(false);
                    state
                        .persist(self.storage.as_ref(), &[PROXY_ENABLED_KEY])
                        .await?;
                    return Err(error);
                }
                Ok(ActivationState::Enabled)
            }
            StartupPolicy::Restore => Ok(ActivationState::Disabled),
        }
    }
}
