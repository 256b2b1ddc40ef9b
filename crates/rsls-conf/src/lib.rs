use std::fs;
use std::path::Path;
use std::time::Duration;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use config::Config;
use config::ConfigError as ExternalConfigError;
use config::File;
use config::FileFormat;
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration build/deserialize error")]
    Config(#[from] ExternalConfigError),
    #[error("Failed to serialize extracted Cargo.toml metadata")]
    ManifestSerialize(#[from] toml::ser::Error),
}

/// Tables inside `Cargo.toml` that may carry settings, lowest priority first.
const MANIFEST_TABLES: [[&str; 3]; 2] = [
    ["workspace", "metadata", "rsls"],
    ["package", "metadata", "rsls"],
];

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    auto_update: bool,
    cargo_path: Option<Utf8PathBuf>,
    debounce_ms: u64,
    metadata_timeout_secs: u64,
    all_features: bool,
    offline: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_update: true,
            cargo_path: None,
            debounce_ms: 1000,
            metadata_timeout_secs: 300,
            all_features: true,
            offline: false,
        }
    }
}

/// The parsed manifest, or `None` when it is missing or unusable. A broken
/// manifest is cargo's to report; settings fall back to the other layers.
fn read_manifest(path: &Path) -> Option<toml::Value> {
    if !path.exists() {
        return None;
    }
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Skipping settings in {}: {}", path.display(), e);
            return None;
        }
    };
    match toml::from_str(&content) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            tracing::warn!("Skipping settings in {}: {}", path.display(), e);
            None
        }
    }
}

impl Settings {
    pub fn new(project_root: &Path) -> Result<Self, ConfigError> {
        let user_config_file = ProjectDirs::from("com.github", "rsls", "rsls")
            .map(|proj_dirs| proj_dirs.config_dir().join("rsls.toml"));

        Self::load_from_paths(project_root, user_config_file.as_deref())
    }

    fn load_from_paths(
        project_root: &Path,
        user_config_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = user_config_path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        if let Some(manifest) = read_manifest(&project_root.join("Cargo.toml")) {
            for table_path in &MANIFEST_TABLES {
                let table = table_path
                    .iter()
                    .try_fold(&manifest, |current, &key| current.get(key))
                    .and_then(toml::Value::as_table);

                if let Some(table) = table {
                    tracing::debug!("Loading settings from Cargo.toml [{}]", table_path.join("."));
                    let rendered = toml::to_string(table)?;
                    builder = builder.add_source(File::from_str(&rendered, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            File::from(project_root.join(".rsls.toml"))
                .format(FileFormat::Toml)
                .required(false),
        );

        builder = builder.add_source(
            File::from(project_root.join("rsls.toml"))
                .format(FileFormat::Toml)
                .required(false),
        );

        let config = builder.build()?;
        let settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Whether manifest changes on disk trigger a background update.
    #[must_use]
    pub fn auto_update(&self) -> bool {
        self.auto_update
    }

    /// Explicit cargo binary. `None` means look it up on `PATH`.
    #[must_use]
    pub fn cargo_path(&self) -> Option<&Utf8Path> {
        self.cargo_path.as_deref()
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Wall-clock limit for one `cargo metadata` run. `None` when disabled.
    #[must_use]
    pub fn metadata_timeout(&self) -> Option<Duration> {
        (self.metadata_timeout_secs > 0).then(|| Duration::from_secs(self.metadata_timeout_secs))
    }

    #[must_use]
    pub fn all_features(&self) -> bool {
        self.all_features
    }

    #[must_use]
    pub fn offline(&self) -> bool {
        self.offline
    }

    #[must_use]
    pub fn with_auto_update(mut self, auto_update: bool) -> Self {
        self.auto_update = auto_update;
        self
    }

    #[must_use]
    pub fn with_cargo_path(mut self, cargo_path: Option<Utf8PathBuf>) -> Self {
        self.cargo_path = cargo_path;
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_metadata_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.metadata_timeout_secs = timeout.map_or(0, |t| t.as_secs().max(1));
        self
    }

    #[must_use]
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }
}
