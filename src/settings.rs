use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Immutable configuration snapshot. The engine holds one and re-reads the
/// store only on an explicit change notification.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_show_toolbar")]
    pub show_toolbar: bool,
    #[serde(default)]
    pub editor_classes: Vec<String>,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_debounce_ms() -> u64 {
    600
}

fn default_request_timeout_secs() -> u64 {
    8
}

fn default_enabled() -> bool {
    true
}

fn default_show_toolbar() -> bool {
    true
}

pub fn get_default_settings() -> Settings {
    Settings {
        endpoint: default_endpoint(),
        api_token: String::new(),
        language: default_language(),
        debounce_ms: default_debounce_ms(),
        request_timeout_secs: default_request_timeout_secs(),
        enabled: default_enabled(),
        show_toolbar: default_show_toolbar(),
        editor_classes: Vec::new(),
    }
}

impl Default for Settings {
    fn default() -> Self {
        get_default_settings()
    }
}

pub const SETTINGS_FILE_NAME: &str = "redline.json";

/// JSON file store for [`Settings`].
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to (and persisting) defaults when the
    /// file is missing or unparseable. A partially-written file loads
    /// cleanly through the per-field serde defaults.
    pub fn load_or_create(&self) -> Settings {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<Settings>(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Failed to parse settings, rewriting defaults: {}", e);
                    let defaults = get_default_settings();
                    self.save(&defaults);
                    defaults
                }
            },
            Err(_) => {
                let defaults = get_default_settings();
                self.save(&defaults);
                defaults
            }
        }
    }

    pub fn save(&self, settings: &Settings) {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent);
            }
        }
        match serde_json::to_string_pretty(settings) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    warn!("Failed to write settings to {:?}: {}", self.path, e);
                }
            }
            Err(e) => warn!("Failed to serialize settings: {}", e),
        }
    }
}
