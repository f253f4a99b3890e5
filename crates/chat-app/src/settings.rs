use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use localchat_chat::ResponseMode;
use localchat_llm::{DEFAULT_BASE_URL, HttpTransportConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "localchat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "chat-history.db";
pub const ENV_PREFIX: &str = "LOCALCHAT_";
pub const DEFAULT_MODEL: &str = "llama3.1:8b";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Unset means `<data_dir>/localchat/chat-history.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub response_mode: ResponseMode,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
            database_path: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            response_mode: ResponseMode::default(),
            stream: default_stream(),
        }
    }
}

impl AppSettings {
    pub fn normalized(mut self) -> Self {
        self.base_url = match self.base_url.trim() {
            "" => default_base_url(),
            trimmed => trimmed.trim_end_matches('/').to_string(),
        };
        self.default_model = match self.default_model.trim() {
            "" => default_model(),
            trimmed => trimmed.to_string(),
        };
        self.database_path = self
            .database_path
            .filter(|path| !path.as_os_str().is_empty());
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }
        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = default_connect_timeout_secs();
        }

        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig::new(self.base_url.clone())
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}

/// Settings file plus `LOCALCHAT_*` environment overrides.
pub struct SettingsStore {
    settings: AppSettings,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".localchat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Result<Self, SettingsError> {
        let settings = Self::load_from_disk(&config_path, true)?;
        Ok(Self {
            settings,
            config_path,
        })
    }

    pub fn load() -> Result<Self, SettingsError> {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Applies `change` to the file contents only, so environment overrides are never persisted.
    /// A file that does not parse is left untouched.
    pub fn update(&mut self, change: impl FnOnce(&mut AppSettings)) -> Result<(), SettingsError> {
        let mut file_settings = Self::load_from_disk(&self.config_path, false)?;
        change(&mut file_settings);
        let file_settings = file_settings.normalized();
        self.persist(&file_settings)?;
        self.settings = Self::load_from_disk(&self.config_path, true)?;
        Ok(())
    }

    fn load_from_disk(path: &Path, with_env: bool) -> Result<AppSettings, SettingsError> {
        let mut figment = Figment::from(Serialized::defaults(AppSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::debug!("settings file not found at {:?}, using defaults", path);
        }
        if with_env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX));
        }

        let settings = figment.extract::<AppSettings>().context(ParseSnafu {
            stage: "extract-settings",
            path: path.to_path_buf(),
        })?;
        Ok(settings.normalized())
    }

    fn persist(&self, settings: &AppSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("invalid settings in {path:?} or LOCALCHAT_* on `{stage}`: {source}"))]
    Parse {
        stage: &'static str,
        path: PathBuf,
        source: figment::Error,
    },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".localchat"))
        .join(DATABASE_FILE_NAME)
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_stream() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let directory = tempfile::tempdir().expect("create temp dir");
        let path = directory.path().join(SETTINGS_FILE_NAME);

        let settings = SettingsStore::load_from_disk(&path, false).expect("load defaults");

        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.base_url, "http://127.0.0.1:11434/api");
        assert_eq!(settings.request_timeout_secs, 60);
        assert!(settings.database_path().ends_with(DATABASE_FILE_NAME));
    }

    #[test]
    fn file_values_override_defaults_and_are_normalized() {
        let directory = tempfile::tempdir().expect("create temp dir");
        let path = directory.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"base_url": " http://gpu-box:11434/api/ ", "default_model": "  ", "response_mode": "concise", "request_timeout_secs": 0}"#,
        )
        .expect("write settings");

        let settings = SettingsStore::load_from_disk(&path, false).expect("load settings");

        assert_eq!(settings.base_url, "http://gpu-box:11434/api");
        assert_eq!(settings.default_model, DEFAULT_MODEL);
        assert_eq!(settings.response_mode, ResponseMode::Concise);
        assert_eq!(settings.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert!(settings.stream);
    }

    #[test]
    fn unparsable_file_is_reported() {
        let directory = tempfile::tempdir().expect("create temp dir");
        let path = directory.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{"response_mode": "verbose"}"#).expect("write settings");

        assert!(matches!(
            SettingsStore::load_from_disk(&path, false),
            Err(SettingsError::Parse { .. })
        ));
        assert!(SettingsStore::new(path).is_err());
    }

    #[test]
    fn update_leaves_an_unparsable_file_untouched() {
        let directory = tempfile::tempdir().expect("create temp dir");
        let path = directory.path().join(SETTINGS_FILE_NAME);
        let mut store = SettingsStore::new(path.clone()).expect("load defaults");
        let hand_edited = "{\"default_model\": \"mistral\", \"stream\": \"sometimes\"}";
        std::fs::write(&path, hand_edited).expect("write settings");

        let result = store.update(|settings| settings.default_model = "llama3.2".to_string());

        assert!(matches!(result, Err(SettingsError::Parse { .. })));
        assert_eq!(
            std::fs::read_to_string(&path).expect("read settings"),
            hand_edited
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn update_persists_and_reloads() {
        let directory = tempfile::tempdir().expect("create temp dir");
        let path = directory.path().join("nested").join(SETTINGS_FILE_NAME);
        let mut store = SettingsStore::new(path.clone()).expect("load defaults");

        store
            .update(|settings| {
                settings.default_model = "deepseek-r1:1.5b".to_string();
                settings.stream = false;
            })
            .expect("update settings");

        assert_eq!(store.settings().default_model, "deepseek-r1:1.5b");
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = SettingsStore::load_from_disk(&path, false).expect("reload settings");
        assert_eq!(reloaded.default_model, "deepseek-r1:1.5b");
        assert!(!reloaded.stream);
    }
}
