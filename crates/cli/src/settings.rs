//! Console settings file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use callcenter_voice_core::{CommandFailurePolicy, VoiceConfig};
use serde::{Deserialize, Serialize};

/// Everything the console reads from `voice.toml`
///
/// ```toml
/// auto_signaling = true
///
/// [voice]
/// token = "eyJhbGciOi..."
/// failure_policy = "warn"
/// connect_timeout_ms = 15000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    /// Echo call commands back as the events a real SDK would emit
    pub auto_signaling: bool,
    pub voice: VoiceConfig,
}

/// Overrides taken from the command line and environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub token: Option<String>,
    pub warn_on_command_failure: bool,
    pub auto_signaling: bool,
}

impl ConsoleSettings {
    /// Apply command-line overrides; flags only ever switch features on
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(token) = overrides.token {
            self.voice.token = token;
        }
        if overrides.warn_on_command_failure {
            self.voice.failure_policy = CommandFailurePolicy::Warn;
        }
        if overrides.auto_signaling {
            self.auto_signaling = true;
        }
        self
    }
}

/// `<config dir>/callcenter/voice.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("callcenter").join("voice.toml"))
}

/// Load settings
///
/// An explicit `path` must exist. Without one, the default location is read
/// when present and defaults are used otherwise.
pub fn load(path: Option<&Path>) -> Result<ConsoleSettings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match default_path() {
            Some(path) if path.exists() => path,
            _ => {
                tracing::debug!("No settings file found, using defaults");
                return Ok(ConsoleSettings::default());
            }
        },
    };

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let settings = parse(&text).with_context(|| format!("Invalid settings in {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded console settings");
    Ok(settings)
}

pub fn parse(text: &str) -> Result<ConsoleSettings> {
    let settings: ConsoleSettings = toml::from_str(text)?;
    settings.voice.validate()?;
    Ok(settings)
}
