//! Named proxy profiles, the active-profile pointer and the on/off switch
//! that applies the current profile, shared by several surfaces through one
//! persisted store.

pub mod activation;
pub mod configuration;
pub mod error;
pub mod profile;
pub mod state;
pub mod storage;
pub mod store;
pub mod surface;
pub mod sync;
pub mod system;
pub mod toggle_state;

pub use activation::{ActivationState, ProxyActivation, ProxyApplier, ProxySettings};
pub use error::{ProxyError, ValidationError};
pub use profile::{ProfileFields, ProfileId, ProxyProfile, parse_bypass_text};
pub use state::GlobalState;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::ProfileStore;
pub use surface::{QuickToggle, SettingsPage};
pub use sync::SyncChannel;
