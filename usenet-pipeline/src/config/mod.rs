//! Application configuration.
//!
//! Loaded once from a JSON file, adjusted from the environment and then shared
//! read-only as `Arc<AppConfig>`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::task::TaskSettings;
use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Default tracing directive when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "usenet_pipeline=info";

/// Executables for the three stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandPaths {
    pub rar: String,
    pub par: String,
    pub nyuu: String,
}

impl Default for CommandPaths {
    fn default() -> Self {
        Self {
            rar: "rar".to_string(),
            par: "parpar".to_string(),
            nyuu: "nyuu".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
    /// Parent of the per-task working folders.
    pub rarpar_folder: PathBuf,
    pub nzb_output_folder: PathBuf,
    pub task_history_folder: PathBuf,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            rarpar_folder: PathBuf::from("data/rarpar"),
            nzb_output_folder: PathBuf::from("data/nzb"),
            task_history_folder: PathBuf::from("data/history"),
        }
    }
}

/// Worker limits and backpressure for the two queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_compression_workers: usize,
    pub max_upload_workers: usize,
    /// Upload backlog that pauses the pre-upload queue. 0 disables it.
    pub max_upload_queue_before_pause: usize,
    pub tick_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_compression_workers: 2,
            max_upload_workers: 1,
            max_upload_queue_before_pause: 2,
            tick_interval_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_compression_workers == 0 {
            return Err(Error::config("max_compression_workers must be at least 1"));
        }
        if self.max_upload_workers == 0 {
            return Err(Error::config("max_upload_workers must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::config("tick_interval_ms must be at least 1"));
        }
        Ok(())
    }
}

/// A news server the uploader can post to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub id: String,
    pub is_default: bool,
    pub is_default_backup: bool,
    pub server: String,
    pub port: u16,
    pub ssl: bool,
    pub username: String,
    pub password: String,
    pub connections: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            is_default: false,
            is_default_backup: false,
            server: String::new(),
            port: 119,
            ssl: false,
            username: String::new(),
            password: String::new(),
            connections: 10,
        }
    }
}

/// Named set of task settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub task_settings: TaskSettings,
}

/// Text file rendered from task variables when a task finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentTemplateSettings {
    pub id: String,
    pub name: String,
    pub file_name: String,
    pub template_content: String,
    pub file_type: String,
    pub save_with_nzb: bool,
}

impl Default for ContentTemplateSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            file_name: String::new(),
            template_content: String::new(),
            file_type: ".txt".to_string(),
            save_with_nzb: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    /// Enables a daily rolling log file in this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub commands: CommandPaths,
    pub folders: FolderConfig,
    /// Delete an earlier task's working folder and NZB instead of renaming.
    pub replace_existing_posted_files: bool,
    pub queue: QueueConfig,
    pub servers: Vec<ServerSettings>,
    pub profiles: Vec<ProfileSettings>,
    pub content_templates: Vec<ContentTemplateSettings>,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Read a JSON config file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| io_error("reading config", path, e))?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Override executable paths from `RAR_PATH`, `PARPAR_PATH` and `NYUU_PATH`.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let targets = [
            ("RAR_PATH", &mut self.commands.rar),
            ("PARPAR_PATH", &mut self.commands.par),
            ("NYUU_PATH", &mut self.commands.nyuu),
        ];
        for (key, target) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                debug!(key, value = %value, "Using executable from environment");
                *target = value;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        for (label, path) in [
            ("rar", &self.commands.rar),
            ("par", &self.commands.par),
            ("nyuu", &self.commands.nyuu),
        ] {
            if path.trim().is_empty() {
                return Err(Error::config(format!("{label} executable path is empty")));
            }
        }
        Ok(())
    }

    pub fn server(&self, id: &str) -> Option<&ServerSettings> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// The server marked default, otherwise the first one.
    pub fn default_server(&self) -> Option<&ServerSettings> {
        self.servers
            .iter()
            .find(|s| s.is_default)
            .or_else(|| self.servers.first())
    }

    pub fn profile(&self, id: &str) -> Option<&ProfileSettings> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// The profile marked default, otherwise the first one.
    pub fn default_profile(&self) -> Option<&ProfileSettings> {
        self.profiles
            .iter()
            .find(|p| p.is_default)
            .or_else(|| self.profiles.first())
    }

    pub fn content_template(&self, id: &str) -> Option<&ContentTemplateSettings> {
        self.content_templates.iter().find(|t| t.id == id)
    }

    /// Settings for a new task.
    ///
    /// Uses the requested profile, then the default profile, then built-in
    /// defaults. An empty server id is filled from the default server.
    pub fn new_task_settings(&self, profile_id: Option<&str>) -> (TaskSettings, String) {
        let profile = profile_id
            .and_then(|id| self.profile(id))
            .or_else(|| self.default_profile());

        let (mut settings, used_profile) = match profile {
            Some(p) => (p.task_settings.clone(), p.id.clone()),
            None => (TaskSettings::default(), String::new()),
        };

        if settings.server_id.is_empty()
            && let Some(server) = self.default_server()
        {
            settings.server_id = server.id.clone();
        }

        (settings, used_profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: &str, is_default: bool) -> ServerSettings {
        ServerSettings {
            id: id.to_string(),
            is_default,
            server: format!("{id}.example.net"),
            ..ServerSettings::default()
        }
    }

    #[test]
    fn defaults_match_queue_limits() {
        let config = AppConfig::default();
        assert_eq!(config.queue.max_compression_workers, 2);
        assert_eq!(config.queue.max_upload_workers, 1);
        assert_eq!(config.queue.max_upload_queue_before_pause, 2);
        assert_eq!(config.commands.par, "parpar");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.queue.max_upload_workers = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn empty_command_rejected() {
        let mut config = AppConfig::default();
        config.commands.nyuu = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_replace_only_present_values() {
        let mut config = AppConfig::default();
        config.apply_overrides_from(|key| match key {
            "NYUU_PATH" => Some("/opt/nyuu/nyuu".to_string()),
            "RAR_PATH" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.commands.nyuu, "/opt/nyuu/nyuu");
        assert_eq!(config.commands.rar, "rar");
    }

    #[test]
    fn load_reads_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"queue":{"max_compression_workers":4},"servers":[{"id":"a","server":"news.example.net"}]}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.queue.max_compression_workers, 4);
        assert_eq!(config.queue.max_upload_workers, 1);
        assert_eq!(config.servers[0].port, 119);
        assert_eq!(config.servers[0].connections, 10);
    }

    #[test]
    fn task_settings_fall_back_through_profiles() {
        let mut config = AppConfig {
            servers: vec![server("first", false), server("main", true)],
            ..AppConfig::default()
        };

        let (settings, used) = config.new_task_settings(Some("missing"));
        assert_eq!(used, "");
        assert_eq!(settings.server_id, "main");

        let mut profile_settings = TaskSettings::default();
        profile_settings.rar_settings.solid_archive = true;
        config.profiles.push(ProfileSettings {
            id: "p1".to_string(),
            name: "Solid".to_string(),
            is_default: true,
            task_settings: profile_settings,
        });

        let (settings, used) = config.new_task_settings(None);
        assert_eq!(used, "p1");
        assert!(settings.rar_settings.solid_archive);
        assert_eq!(settings.server_id, "main");
    }
}
