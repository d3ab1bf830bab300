use super::proxy::ProxyBackend;

const INTERNET_SETTINGS_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Internet Settings";

fn notify_proxy_settings_changed() {
    use windows::Win32::Networking::WinInet::{
        INTERNET_OPTION_REFRESH, INTERNET_OPTION_SETTINGS_CHANGED, InternetSetOptionW,
    };

    unsafe {
        let _ = InternetSetOptionW(None, INTERNET_OPTION_SETTINGS_CHANGED, None, 0);
        let _ = InternetSetOptionW(None, INTERNET_OPTION_REFRESH, None, 0);
    }
}

pub fn set_system_proxy(host: &str, port: u16, bypass_list: &[String]) -> Result<String, String> {
    let proxy_value = format!("{host}:{port}");
    let override_value = bypass_list.join(";");

    log::info!("[proxy] setting system HTTP proxy to {proxy_value}");

    let key = windows_registry::CURRENT_USER
        .create(INTERNET_SETTINGS_KEY)
        .map_err(|error| format!("failed to open registry key: {error}"))?;
    key.set_string("ProxyServer", &proxy_value)
        .map_err(|error| format!("failed to set ProxyServer: {error}"))?;
    key.set_string("ProxyOverride", &override_value)
        .map_err(|error| format!("failed to set ProxyOverride: {error}"))?;
    key.set_u32("ProxyEnable", 1)
        .map_err(|error| format!("failed to set ProxyEnable: {error}"))?;

    notify_proxy_settings_changed();

    if let Ok(key) = windows_registry::CURRENT_USER.open(INTERNET_SETTINGS_KEY) {
        log::info!(
            "[proxy] registry verify: ProxyEnable={}, ProxyServer={}, ProxyOverride={}",
            key.get_u32("ProxyEnable").unwrap_or(0),
            key.get_string("ProxyServer").unwrap_or_default(),
            key.get_string("ProxyOverride").unwrap_or_default(),
        );
    }

    Ok(format!(
        "System proxy configured via registry (HTTP {proxy_value})"
    ))
}

pub fn clear_system_proxy() -> Result<String, String> {
    log::info!("[proxy] clearing system proxy settings");

    let key = windows_registry::CURRENT_USER
        .create(INTERNET_SETTINGS_KEY)
        .map_err(|error| format!("failed to open registry key: {error}"))?;
    key.set_u32("ProxyEnable", 0)
        .map_err(|error| format!("failed to set ProxyEnable: {error}"))?;
    let _ = key.remove_value("ProxyServer");
    let _ = key.remove_value("ProxyOverride");

    notify_proxy_settings_changed();

    Ok("System proxy cleared via registry".into())
}

pub struct RegistryProxy;

impl ProxyBackend for RegistryProxy {
    fn name(&self) -> &str {
        "Windows Registry"
    }

    fn set(&mut self, host: &str, port: u16, bypass_list: &[String]) -> Result<String, String> {
        set_system_proxy(host, port, bypass_list)
    }

    fn clear(&mut self) -> Result<String, String> {
        clear_system_proxy()
    }
}
