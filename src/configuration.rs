use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartupPolicy {
    /// Force the platform back to direct routing and persist `proxyEnabled=false`.
    #[default]
    Reset,
    /// Re-apply the current profile if the persisted state says enabled.
    Restore,
}

impl StartupPolicy {
    pub fn label(self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Restore => "restore",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    System,
    DryRun,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Configuration {
    #[serde(default)]
    pub startup_policy: StartupPolicy,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

pub fn configuration_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("proxy-switch")
}

impl Configuration {
    pub fn default_path() -> PathBuf {
        configuration_directory().join("proxy-switch.toml")
    }

    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|error| {
                log::warn!("[configuration] failed to parse {}: {error}", path.display());
                Self::default()
            }),
            Err(_) => {
                log::info!(
                    "[configuration] no configuration file at {}, using defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| configuration_directory().join("state.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let configuration = Configuration::parse("").unwrap();
        assert_eq!(configuration, Configuration::default());
        assert_eq!(configuration.startup_policy, StartupPolicy::Reset);
        assert_eq!(configuration.backend, BackendKind::System);
    }

    #[test]
    fn all_fields_parse() {
        let configuration = Configuration::parse(
            r#"
            startup_policy = "restore"
            backend = "dry-run"
            state_file = "/tmp/proxy-state.toml"
            "#,
        )
        .unwrap();

        assert_eq!(configuration.startup_policy, StartupPolicy::Restore);
        assert_eq!(configuration.backend, BackendKind::DryRun);
        assert_eq!(
            configuration.state_file_path(),
            PathBuf::from("/tmp/proxy-state.toml")
        );
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(Configuration::parse(r#"startup_policy = "sometimes""#).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let configuration = Configuration::load(&directory.path().join("absent.toml"));
        assert_eq!(configuration, Configuration::default());
    }
}
