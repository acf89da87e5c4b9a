use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Local configuration, read from `~/.provisio/config.json`.
///
/// The only setting most installations carry is the password-store directory
/// override; everything else has a sensible default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External password-store settings
    pub password_store: PasswordStoreConfig,
    /// Top-level store prefix under which all credentials live
    pub realm: String,
    /// Run the browser without a visible window
    pub headless: bool,
    /// Where site-triggered downloads (e.g. recovery-code files) land
    pub downloads_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordStoreConfig {
    /// Directory passed to `pass` as PASSWORD_STORE_DIR
    pub dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            password_store: PasswordStoreConfig::default(),
            realm: "bots".to_string(),
            headless: false,
            downloads_dir: None,
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home_dir.join(".provisio").join("config.json")
    }

    /// Load configuration from file; a missing file yields the defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = path.unwrap_or_else(Self::default_path);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("malformed {}: {}", config_path.display(), e)))
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self, path: Option<PathBuf>) -> Result<()> {
        let config_path = path.unwrap_or_else(Self::default_path);

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("unable to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Effective downloads directory (config value, else the OS default).
    pub fn downloads_dir(&self) -> PathBuf {
        self.downloads_dir.clone().unwrap_or_else(|| {
            dirs::download_dir()
                .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.realm, "bots");
        assert!(!config.headless);
        assert!(config.password_store.dir.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(dir.path().join("nope.json"))).unwrap();
        assert_eq!(config.realm, "bots");
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.password_store.dir = Some(PathBuf::from("/srv/cbi-pass"));
        config.realm = "robots".to_string();
        config.save(Some(path.clone())).unwrap();

        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(
            loaded.password_store.dir,
            Some(PathBuf::from("/srv/cbi-pass"))
        );
        assert_eq!(loaded.realm, "robots");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = Config::load(Some(path)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"password_store": {"dir": "/tmp/store"}}"#).unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.password_store.dir, Some(PathBuf::from("/tmp/store")));
        assert_eq!(config.realm, "bots");
    }
}
