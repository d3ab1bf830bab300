use crate::activation::ActivationState;

/// What the quick toggle shows next to its switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToggleState {
    Off,
    Enabling,
    On,
    Disabling,
    Error(String),
}

impl ToggleState {
    pub fn label(&self) -> String {
        match self {
            Self::Off => "Off".into(),
            Self::Enabling => "Enabling…".into(),
            Self::On => "On".into(),
            Self::Disabling => "Disabling…".into(),
            Self::Error(message) => format!("Error: {message}"),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Enabling | Self::Disabling)
    }
}

impl From<ActivationState> for ToggleState {
    fn from(state: ActivationState) -> Self {
        match state {
            ActivationState::Enabled => Self::On,
            ActivationState::Disabled => Self::Off,
        }
    }
}
