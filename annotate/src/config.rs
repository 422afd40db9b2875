//! Runtime configuration
//!
//! Precedence, lowest to highest: built-in defaults, the configuration
//! file (`vernier.config`, or the path in `VERNIER_CONFIG_FILE`),
//! environment variables (`VERNIER_<SECTION>_<KEY>`), and values set
//! explicitly by the application.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use vernier_context::{Error, Result};

pub struct RuntimeConfig {
    file_entries: HashMap<String, String>,
    set_entries: RwLock<HashMap<String, String>>,
}

impl RuntimeConfig {
    /// Load configuration from the default file location, if present.
    pub fn from_environment() -> Self {
        let path = std::env::var("VERNIER_CONFIG_FILE").unwrap_or_else(|_| "vernier.config".into());
        let file_entries = match std::fs::read_to_string(Path::new(&path)) {
            Ok(text) => Self::parse_file(&text),
            Err(_) => HashMap::new(),
        };
        Self {
            file_entries,
            set_entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn empty() -> Self {
        Self {
            file_entries: HashMap::new(),
            set_entries: RwLock::new(HashMap::new()),
        }
    }

    fn parse_file(text: &str) -> HashMap<String, String> {
        let mut entries = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        entries
    }

    fn env_name(section: &str, key: &str) -> String {
        format!(
            "VERNIER_{}_{}",
            section.to_uppercase().replace(['.', '-'], "_"),
            key.to_uppercase().replace(['.', '-'], "_")
        )
    }

    /// Explicit application override; wins over file and environment.
    pub fn set(&self, section: &str, key: &str, value: &str) {
        self.set_entries
            .write()
            .unwrap()
            .insert(format!("{section}.{key}"), value.to_string());
    }

    pub fn get(&self, section: &str, key: &str) -> Option<String> {
        let full = format!("{section}.{key}");
        if let Some(v) = self.set_entries.read().unwrap().get(&full) {
            return Some(v.clone());
        }
        if let Ok(v) = std::env::var(Self::env_name(section, key)) {
            return Some(v);
        }
        self.file_entries.get(&full).cloned()
    }

    pub fn get_or(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> Result<bool> {
        match self.get(section, key).as_deref() {
            None => Ok(default),
            Some("true") | Some("1") | Some("yes") => Ok(true),
            Some("false") | Some("0") | Some("no") => Ok(false),
            Some(other) => Err(Error::Config(format!(
                "{section}.{key}: expected a boolean, got \"{other}\""
            ))),
        }
    }

    pub fn get_int(&self, section: &str, key: &str, default: i64) -> Result<i64> {
        match self.get(section, key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| {
                Error::Config(format!("{section}.{key}: expected an integer, got \"{v}\""))
            }),
        }
    }
}
