use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::remote::client::DEFAULT_API_BASE;

/// One remote goal and the tag filter deciding which log entries count
/// toward it. How tags map to hours is decided here and in
/// [projection](crate::remote::projection), not by the sync machinery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoalConfig {
    /// Goal slug on the remote service.
    pub goal: String,
    /// An entry counts when any of its tags matches any of these.
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Name of the tracked user. Also names the log file.
    pub username: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Average minutes between pings. One matching ping is worth this much.
    #[serde(default = "default_gap_minutes")]
    pub gap_minutes: u32,
    #[serde(default)]
    pub goals: Vec<GoalConfig>,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_gap_minutes() -> u32 {
    45
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: "user".into(),
            auth_token: String::new(),
            api_base: default_api_base(),
            gap_minutes: default_gap_minutes(),
            goals: vec![],
        }
    }
}

impl Settings {
    /// Reads the settings file from the application directory, writing a
    /// default one on first run so the user has something to edit.
    pub fn load_or_create(application_data_path: &Path) -> Result<Settings> {
        let path = Self::path(application_data_path);
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Couldn't read settings at {path:?}"))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Couldn't parse settings at {path:?}"))
        } else {
            let settings = Settings::default();
            fs::write(&path, serde_json::to_string_pretty(&settings)?)
                .with_context(|| format!("Couldn't write default settings to {path:?}"))?;
            info!("Created default settings at {path:?}");
            Ok(settings)
        }
    }

    pub fn path(application_data_path: &Path) -> PathBuf {
        application_data_path.join("settings.json")
    }

    pub fn log_path(&self, application_data_path: &Path) -> PathBuf {
        application_data_path.join(format!("{}.log", self.username))
    }
}
