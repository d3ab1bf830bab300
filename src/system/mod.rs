use std::{
    process::{Command, Stdio},
    sync::{Arc, Mutex},
};

use futures::{
    FutureExt,
    future::{self, BoxFuture},
};

use crate::{
    activation::{ProxyApplier, ProxySettings},
    configuration::BackendKind,
};

pub mod proxy;

#[cfg(target_os = "windows")]
mod windows;

use proxy::ProxyBackend;

/// Applies settings to the desktop's system-wide proxy configuration.
pub struct SystemProxy {
    backends: Mutex<Vec<Box<dyn ProxyBackend>>>,
}

impl SystemProxy {
    pub fn detect() -> Self {
        Self::with_backends(proxy::detect())
    }

    pub fn with_backends(backends: Vec<Box<dyn ProxyBackend>>) -> Self {
        Self {
            backends: Mutex::new(backends),
        }
    }

    fn apply_blocking(&self, settings: &ProxySettings) -> Result<(), String> {
        let mut backends = self
            .backends
            .lock()
            .map_err(|_| "proxy backend lock poisoned".to_string())?;
        let detail = match settings {
            ProxySettings::Fixed {
                host,
                port,
                bypass_list,
            } => proxy::set_all(&mut backends, host, *port, bypass_list)?,
            ProxySettings::Direct => proxy::clear_all(&mut backends)?,
        };
        log::info!("[proxy] {detail}");
        Ok(())
    }
}

impl ProxyApplier for SystemProxy {
    fn apply(&self, settings: ProxySettings) -> BoxFuture<'_, Result<(), String>> {
        future::ready(self.apply_blocking(&settings)).boxed()
    }
}

/// Logs what would be applied and always succeeds.
#[derive(Default)]
pub struct DryRunProxy;

impl ProxyApplier for DryRunProxy {
    fn apply(&self, settings: ProxySettings) -> BoxFuture<'_, Result<(), String>> {
        match serde_json::to_string(&settings) {
            Ok(json) => log::info!("[proxy] dry run: applyProxy({json})"),
            Err(error) => log::warn!("[proxy] dry run: cannot encode settings: {error}"),
        }
        future::ready(Ok(())).boxed()
    }
}

pub fn applier_for(backend: BackendKind) -> Arc<dyn ProxyApplier> {
    match backend {
        BackendKind::System => Arc::new(SystemProxy::detect()),
        BackendKind::DryRun => Arc::new(DryRunProxy),
    }
}

#[cfg(target_os = "windows")]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x08000000;

pub fn run_silent_with_output(program: &str, arguments: &[&str]) -> (bool, String) {
    log::debug!("[cmd] {} {}", program, arguments.join(" "));
    let mut command = Command::new(program);
    command
        .args(arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    match command.output() {
        Ok(output) => {
            let success = output.status.success();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            if !success {
                log::debug!(
                    "[cmd] FAILED (exit {}): {} {}\n  stdout: {}\n  stderr: {}",
                    output.status.code().unwrap_or(-1),
                    program,
                    arguments.join(" "),
                    stdout.trim(),
                    stderr.trim(),
                );
            } else {
                log::trace!(
                    "[cmd] OK: {} {} -> stdout={}",
                    program,
                    arguments.join(" "),
                    stdout.trim(),
                );
            }
            (success, stdout)
        }
        Err(error) => {
            log::debug!("[cmd] spawn error for {}: {}", program, error);
            (false, error.to_string())
        }
    }
}

pub fn run_silent(program: &str, arguments: &[&str]) -> bool {
    run_silent_with_output(program, arguments).0
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn system_proxy_without_backends_reports_failure() {
        let applier = SystemProxy::with_backends(Vec::new());
        let result = block_on(applier.apply(ProxySettings::Direct));
        assert_eq!(result, Err("No proxy backend available".to_string()));
    }

    #[test]
    fn dry_run_accepts_everything() {
        let settings = ProxySettings::Fixed {
            host: "127.0.0.1".into(),
            port: 8998,
            bypass_list: vec!["localhost".into()],
        };
        assert_eq!(block_on(DryRunProxy.apply(settings)), Ok(()));
    }

    #[test]
    fn settings_serialize_with_mode_tag() {
        let fixed = ProxySettings::Fixed {
            host: "127.0.0.1".into(),
            port: 8998,
            bypass_list: vec!["localhost".into()],
        };
        assert_eq!(
            serde_json::to_value(&fixed).unwrap(),
            serde_json::json!({
                "mode": "fixed",
                "host": "127.0.0.1",
                "port": 8998,
                "bypassList": ["localhost"],
            })
        );
        assert_eq!(
            serde_json::to_value(ProxySettings::Direct).unwrap(),
            serde_json::json!({"mode": "direct"})
        );
    }
}
