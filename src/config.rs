use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const MAX_PORT_ATTEMPTS: u16 = 1_000;

/// All configurable settings with their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_port_attempts: u16,
    pub collector_poll_interval_ms: u64,
    pub browser_executable: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_port_attempts: 100,
            collector_poll_interval_ms: 50,
            browser_executable: None,
        }
    }
}

/// Raw JSON representation; every field is optional for partial overrides.
#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    #[serde(rename = "server.portAttempts")]
    server_port_attempts: Option<u16>,
    #[serde(rename = "collector.pollIntervalMs")]
    collector_poll_interval_ms: Option<u64>,
    #[serde(rename = "browser.executable")]
    browser_executable: Option<PathBuf>,
}

/// Resolve settings: defaults → user global → project-local.
pub fn resolve(project_root: &Path) -> Settings {
    let global_path = dirs::home_dir()
        .map(|h| h.join(".mocha-headless/settings.json"));
    let project_path = project_root.join(".mocha-headless/settings.json");
    resolve_with_paths(global_path.as_deref(), Some(&project_path))
}

/// Resolver over explicit file paths (no home dir dependency).
fn resolve_with_paths(global_path: Option<&Path>, project_path: Option<&Path>) -> Settings {
    let mut settings = Settings::default();

    if let Some(path) = global_path {
        apply_file(&mut settings, path);
    }
    if let Some(path) = project_path {
        apply_file(&mut settings, path);
    }

    settings
}

fn apply_file(settings: &mut Settings, path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else { return };
    let Ok(file) = serde_json::from_str::<SettingsFile>(&content) else {
        tracing::warn!("Invalid settings file, ignoring: {}", path.display());
        return;
    };
    if let Some(v) = file.server_port_attempts {
        if v > 0 && v <= MAX_PORT_ATTEMPTS {
            settings.server_port_attempts = v;
        } else {
            tracing::warn!(
                "server.portAttempts ({}) out of range (1..{}), using default",
                v, MAX_PORT_ATTEMPTS
            );
        }
    }
    if let Some(v) = file.collector_poll_interval_ms {
        if (10..=5_000).contains(&v) {
            settings.collector_poll_interval_ms = v;
        } else {
            tracing::warn!(
                "collector.pollIntervalMs ({}) out of range (10..5000), using default",
                v
            );
        }
    }
    if let Some(path) = file.browser_executable {
        settings.browser_executable = Some(path);
    }
}
