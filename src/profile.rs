use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const DEFAULT_PROFILE_ID: &str = "default";
pub const DEFAULT_PROFILE_NAME: &str = "Default";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: &str = "8998";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Millisecond timestamp, suffixed with a counter when it collides with
    /// an id that is already taken.
    pub fn fresh(existing: &[ProxyProfile]) -> Self {
        let base = chrono::Utc::now().timestamp_millis().to_string();
        let mut counter = 0u32;
        let mut candidate = base.clone();
        while existing.iter().any(|profile| profile.id.0 == candidate) {
            counter += 1;
            candidate = format!("{base}-{counter}");
        }
        Self(candidate)
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProfileId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyProfile {
    pub id: ProfileId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub bypass_list: Vec<String>,
}

impl ProxyProfile {
    pub fn default_profile() -> Self {
        Self {
            id: ProfileId::new(DEFAULT_PROFILE_ID),
            name: DEFAULT_PROFILE_NAME.into(),
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT.into(),
            bypass_list: vec!["localhost".into(), "127.0.0.1".into()],
        }
    }

    /// `host:port`, as shown by the quick toggle.
    pub fn target_label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Raw form input for creating or editing a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileFields {
    pub name: String,
    pub host: String,
    pub port: String,
    pub bypass_list: Vec<String>,
}

impl ProfileFields {
    pub fn from_profile(profile: &ProxyProfile) -> Self {
        Self {
            name: profile.name.clone(),
            host: profile.host.clone(),
            port: profile.port.clone(),
            bypass_list: profile.bypass_list.clone(),
        }
    }

    /// Checks the required fields and builds the stored profile.
    ///
    /// Name and host are trimmed, the port is stored in its canonical
    /// decimal form and bypass patterns are trimmed with empties dropped.
    pub fn into_profile(self, id: ProfileId) -> Result<ProxyProfile, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ValidationError::MissingHost);
        }
        let port = parse_port(&self.port)?;

        Ok(ProxyProfile {
            id,
            name: name.to_string(),
            host: host.to_string(),
            port: port.to_string(),
            bypass_list: normalize_patterns(self.bypass_list.iter().map(String::as_str)),
        })
    }
}

pub fn parse_port(raw: &str) -> Result<u16, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingPort);
    }
    match trimmed.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ValidationError::InvalidPort(trimmed.to_string())),
    }
}

/// One pattern per line; lines are trimmed and blank lines dropped.
pub fn parse_bypass_text(raw: &str) -> Vec<String> {
    normalize_patterns(raw.lines())
}

pub fn bypass_text(patterns: &[String]) -> String {
    patterns.join("\n")
}

fn normalize_patterns<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    lines
        .flat_map(|line| line.split('\r'))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(name: &str, host: &str, port: &str) -> ProfileFields {
        ProfileFields {
            name: name.into(),
            host: host.into(),
            port: port.into(),
            bypass_list: Vec::new(),
        }
    }

    #[test]
    fn bypass_text_is_trimmed_and_blank_lines_dropped() {
        let parsed = parse_bypass_text("  localhost \n\n127.0.0.1\r\n   \n*.example.com\rfoo\n");
        assert_eq!(parsed, vec!["localhost", "127.0.0.1", "*.example.com", "foo"]);
    }

    #[test]
    fn bypass_text_keeps_duplicates_and_case() {
        let parsed = parse_bypass_text("Example.com\nexample.com\nExample.com");
        assert_eq!(parsed, vec!["Example.com", "example.com", "Example.com"]);
    }

    #[test]
    fn bypass_text_parse_is_idempotent() {
        let samples = [
            "",
            "\n\n",
            " a \n b\r\n\r\nc ",
            "<local>\n  10.*  \n\t192.168.*\t",
            "\r\r x \r",
        ];
        for sample in samples {
            let once = parse_bypass_text(sample);
            let twice = parse_bypass_text(&bypass_text(&once));
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn port_must_be_in_range() {
        assert_eq!(parse_port(" 8998 "), Ok(8998));
        assert_eq!(parse_port("65535"), Ok(65535));
        assert_eq!(parse_port(""), Err(ValidationError::MissingPort));
        assert_eq!(parse_port("0"), Err(ValidationError::InvalidPort("0".into())));
        assert_eq!(
            parse_port("65536"),
            Err(ValidationError::InvalidPort("65536".into()))
        );
        assert_eq!(
            parse_port("http"),
            Err(ValidationError::InvalidPort("http".into()))
        );
    }

    #[test]
    fn required_fields_are_checked_in_order() {
        let id = ProfileId::new("x");
        assert_eq!(
            fields(" ", "h", "1").into_profile(id.clone()),
            Err(ValidationError::MissingName)
        );
        assert_eq!(
            fields("n", "", "1").into_profile(id.clone()),
            Err(ValidationError::MissingHost)
        );
        assert_eq!(
            fields("n", "h", "").into_profile(id),
            Err(ValidationError::MissingPort)
        );
    }

    #[test]
    fn profile_is_normalized() {
        let mut input = fields(" Office ", " proxy.local ", "0080");
        input.bypass_list = vec![" localhost ".into(), "".into(), "10.*".into()];

        let profile = input.into_profile(ProfileId::new("office")).unwrap();

        assert_eq!(profile.name, "Office");
        assert_eq!(profile.host, "proxy.local");
        assert_eq!(profile.port, "80");
        assert_eq!(profile.bypass_list, vec!["localhost", "10.*"]);
        assert_eq!(profile.target_label(), "proxy.local:80");
    }

    #[test]
    fn fresh_id_avoids_collisions() {
        let first = ProfileId::fresh(&[]);
        let taken = ProxyProfile {
            id: first.clone(),
            ..ProxyProfile::default_profile()
        };
        let second = ProfileId::fresh(&[taken]);
        assert_ne!(first, second);
    }
}
