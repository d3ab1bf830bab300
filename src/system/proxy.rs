#[cfg(target_os = "linux")]
use std::path::PathBuf;

#[cfg(target_os = "linux")]
use super::{run_silent, run_silent_with_output};

/// One desktop mechanism for system-wide proxy settings.
pub trait ProxyBackend: Send {
    fn name(&self) -> &str;
    fn set(&mut self, host: &str, port: u16, bypass_list: &[String]) -> Result<String, String>;
    fn clear(&mut self) -> Result<String, String>;
}

/// Multiple backends may be returned (e.g. both GSettings and KDE KIO).
#[cfg(target_os = "linux")]
pub fn detect() -> Vec<Box<dyn ProxyBackend>> {
    let mut backends: Vec<Box<dyn ProxyBackend>> = Vec::new();

    if GnomeProxy::is_available() {
        log::info!("[proxy] detected backend: GSettings (GNOME-based)");
        backends.push(Box::new(GnomeProxy));
    }

    if KdeProxy::is_available() {
        log::info!("[proxy] detected backend: KDE KIO");
        backends.push(Box::new(KdeProxy));
    }

    if backends.is_empty() {
        let desktop = std::env::var("XDG_CURRENT_DESKTOP").unwrap_or_default();
        log::warn!(
            "[proxy] no proxy backend detected for desktop '{}'",
            if desktop.is_empty() {
                "unknown"
            } else {
                &desktop
            },
        );
    }

    backends
}

#[cfg(target_os = "windows")]
pub fn detect() -> Vec<Box<dyn ProxyBackend>> {
    vec![Box::new(super::windows::RegistryProxy)]
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
pub fn detect() -> Vec<Box<dyn ProxyBackend>> {
    log::warn!("[proxy] no proxy backend for this platform");
    Vec::new()
}

/// Every backend is attempted; any failure fails the whole call.
pub fn set_all(
    backends: &mut [Box<dyn ProxyBackend>],
    host: &str,
    port: u16,
    bypass_list: &[String],
) -> Result<String, String> {
    run_all(backends, |backend| backend.set(host, port, bypass_list))
}

pub fn clear_all(backends: &mut [Box<dyn ProxyBackend>]) -> Result<String, String> {
    run_all(backends, |backend| backend.clear())
}

fn run_all(
    backends: &mut [Box<dyn ProxyBackend>],
    mut operation: impl FnMut(&mut Box<dyn ProxyBackend>) -> Result<String, String>,
) -> Result<String, String> {
    if backends.is_empty() {
        return Err("No proxy backend available".into());
    }

    let mut details = Vec::new();
    let mut failures = Vec::new();
    for backend in backends.iter_mut() {
        match operation(backend) {
            Ok(detail) => {
                log::info!("[proxy] {} OK: {detail}", backend.name());
                details.push(detail);
            }
            Err(detail) => {
                log::warn!("[proxy] {} FAILED: {detail}", backend.name());
                failures.push(format!("{}: {detail}", backend.name()));
            }
        }
    }

    if failures.is_empty() {
        Ok(details.join("; "))
    } else {
        Err(failures.join("; "))
    }
}

/// Formats patterns as a GVariant string array, e.g. `['localhost', '*.lan']`.
pub fn gsettings_string_array(patterns: &[String]) -> String {
    let quoted: Vec<String> = patterns
        .iter()
        .map(|pattern| format!("'{}'", pattern.replace('\\', "\\\\").replace('\'', "\\'")))
        .collect();
    format!("[{}]", quoted.join(", "))
}

#[cfg(target_os = "linux")]
pub struct GnomeProxy;

#[cfg(target_os = "linux")]
impl GnomeProxy {
    pub fn is_available() -> bool {
        let desktop = std::env::var("XDG_CURRENT_DESKTOP").unwrap_or_default();
        desktop.split(':').any(|d| {
            matches!(
                d,
                "GNOME" | "Unity" | "Cinnamon" | "X-Cinnamon" | "MATE" | "Budgie" | "Pantheon"
            )
        })
    }

    fn gsettings(arguments: &[&str], failed: &mut Vec<String>) {
        if !run_silent("gsettings", arguments) {
            failed.push(arguments.join(" "));
        }
    }
}

#[cfg(target_os = "linux")]
impl ProxyBackend for GnomeProxy {
    fn name(&self) -> &str {
        "GSettings"
    }

    fn set(&mut self, host: &str, port: u16, bypass_list: &[String]) -> Result<String, String> {
        let port_string = port.to_string();
        let ignore_hosts = gsettings_string_array(bypass_list);
        let mut failed = Vec::new();

        log::info!("[proxy] GSettings: setting HTTP proxy to {host}:{port}");

        for schema in ["org.gnome.system.proxy.http", "org.gnome.system.proxy.https"] {
            Self::gsettings(&["set", schema, "host", host], &mut failed);
            Self::gsettings(&["set", schema, "port", &port_string], &mut failed);
        }
        Self::gsettings(
            &["set", "org.gnome.system.proxy", "ignore-hosts", &ignore_hosts],
            &mut failed,
        );
        Self::gsettings(
            &["set", "org.gnome.system.proxy", "mode", "manual"],
            &mut failed,
        );

        if !failed.is_empty() {
            return Err(format!("gsettings failed: {}", failed.join(", ")));
        }

        let (_, verify_mode) =
            run_silent_with_output("gsettings", &["get", "org.gnome.system.proxy", "mode"]);
        let (_, verify_host) = run_silent_with_output(
            "gsettings",
            &["get", "org.gnome.system.proxy.http", "host"],
        );
        log::info!(
            "[proxy] GSettings verify: mode={}, http_host={}",
            verify_mode.trim(),
            verify_host.trim(),
        );

        Ok(format!(
            "System proxy configured via GSettings (HTTP {host}:{port}, {} bypass patterns)",
            bypass_list.len()
        ))
    }

    fn clear(&mut self) -> Result<String, String> {
        log::info!("[proxy] GSettings: clearing proxy settings");

        let mut failed = Vec::new();
        Self::gsettings(
            &["set", "org.gnome.system.proxy", "mode", "none"],
            &mut failed,
        );
        if !failed.is_empty() {
            return Err(format!("gsettings failed: {}", failed.join(", ")));
        }
        Ok("System proxy cleared via GSettings".into())
    }
}

#[cfg(target_os = "linux")]
pub struct KdeProxy;

#[cfg(target_os = "linux")]
impl KdeProxy {
    pub fn is_available() -> bool {
        let desktop = std::env::var("XDG_CURRENT_DESKTOP").unwrap_or_default();
        desktop.split(':').any(|d| d == "KDE" || d == "Trinity")
    }

    fn kwriteconfig_command() -> &'static str {
        match std::env::var("KDE_SESSION_VERSION")
            .unwrap_or_default()
            .as_str()
        {
            "6" => "kwriteconfig6",
            "5" => "kwriteconfig5",
            _ => "kwriteconfig6",
        }
    }

    fn kioslaverc_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kioslaverc")
    }

    fn write_key(key: &str, value: &str) -> Result<(), String> {
        let kioslaverc = Self::kioslaverc_path().to_string_lossy().to_string();
        let written = run_silent(
            Self::kwriteconfig_command(),
            &[
                "--file",
                &kioslaverc,
                "--group",
                "Proxy Settings",
                "--key",
                key,
                value,
            ],
        );
        if written {
            Ok(())
        } else {
            Err(format!("failed to write {key} to {kioslaverc}"))
        }
    }

    fn notify_kio() {
        run_silent(
            "dbus-send",
            &[
                "--type=signal",
                "/KIO/Scheduler",
                "org.kde.KIO.Scheduler.reparseSlaveConfiguration",
                "string:''",
            ],
        );
    }
}

#[cfg(target_os = "linux")]
impl ProxyBackend for KdeProxy {
    fn name(&self) -> &str {
        "KDE KIO"
    }

    fn set(&mut self, host: &str, port: u16, bypass_list: &[String]) -> Result<String, String> {
        let proxy_url = format!("http://{host}:{port}");
        log::info!(
            "[proxy] KDE: setting HTTP proxy to {proxy_url} (kwriteconfig={})",
            Self::kwriteconfig_command(),
        );

        Self::write_key("httpProxy", &proxy_url)?;
        Self::write_key("httpsProxy", &proxy_url)?;
        Self::write_key("NoProxyFor", &bypass_list.join(","))?;
        Self::write_key("ProxyType", "1")?;
        Self::notify_kio();

        Ok(format!("System proxy configured via KDE KIO (HTTP {host}:{port})"))
    }

    fn clear(&mut self) -> Result<String, String> {
        log::info!("[proxy] KDE: clearing proxy settings");
        Self::write_key("ProxyType", "0")?;
        Self::notify_kio();
        Ok("System proxy cleared via KDE KIO".into())
    }
}
