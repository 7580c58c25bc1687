use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "ordit";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SessionConfig {
    /// Pre-fills the sign-in form.
    pub email: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct LogConfig {
    pub file: Option<PathBuf>,
}

// On-disk shape; every key is optional so the environment can fill gaps.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    backend: FileBackend,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    log: LogConfig,
}

#[derive(Debug, Default, Deserialize)]
struct FileBackend {
    url: Option<String>,
    anon_key: Option<String>,
    timeout_secs: Option<u64>,
}

impl Config {
    /// Reads `.env`, the TOML config file and the environment, in that order
    /// of increasing precedence.
    pub fn load() -> Result<Config> {
        dotenv::dotenv().ok();
        let file = match config_path() {
            Some(path) => read_file(&path)?,
            None => FileConfig::default(),
        };
        Config::resolve(file, |key| env::var(key).ok())
    }

    pub fn from_toml_str(raw: &str, env_lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
        let file: FileConfig =
            toml::from_str(raw).map_err(|err| Error::Config(format!("invalid config: {}", err)))?;
        Config::resolve(file, env_lookup)
    }

    fn resolve(file: FileConfig, env_lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
        let url = env_lookup("SUPABASE_URL")
            .or(file.backend.url)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::Config("SUPABASE_URL not set".into()))?;
        let anon_key = env_lookup("SUPABASE_ANON_KEY")
            .or(file.backend.anon_key)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Config("SUPABASE_ANON_KEY not set".into()))?;

        Ok(Config {
            backend: BackendConfig {
                url,
                anon_key,
                timeout_secs: file.backend.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            },
            session: file.session,
            log: file.log,
        })
    }

    pub fn log_file(&self) -> PathBuf {
        self.log.file.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(env::temp_dir)
                .join(APP_DIR)
                .join("ordit.log")
        })
    }
}

fn config_path() -> Option<PathBuf> {
    env::var_os("ORDIT_CONFIG")
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml")))
}

fn read_file(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let raw = fs::read_to_string(path)?;
    toml::from_str(&raw)
        .map_err(|err| Error::Config(format!("invalid config {}: {}", path.display(), err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_full_file() {
        let raw = r#"
            [backend]
            url = "https://demo.supabase.co"
            anon_key = "anon"
            timeout_secs = 3

            [session]
            email = "ana@example.com"

            [log]
            file = "/tmp/ordit-test.log"
        "#;
        let config = Config::from_toml_str(raw, no_env).unwrap();
        assert_eq!(config.backend.url, "https://demo.supabase.co");
        assert_eq!(config.backend.anon_key, "anon");
        assert_eq!(config.backend.timeout_secs, 3);
        assert_eq!(config.session.email.as_deref(), Some("ana@example.com"));
        assert_eq!(config.log_file(), PathBuf::from("/tmp/ordit-test.log"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let raw = r#"
            [backend]
            url = "https://file.supabase.co"
            anon_key = "file-key"
        "#;
        let config = Config::from_toml_str(raw, |key| match key {
            "SUPABASE_URL" => Some("https://env.supabase.co".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.backend.url, "https://env.supabase.co");
        assert_eq!(config.backend.anon_key, "file-key");
        assert_eq!(config.backend.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_environment_alone_is_enough() {
        let config = Config::from_toml_str("", |key| Some(format!("{}-value", key))).unwrap();
        assert_eq!(config.backend.url, "SUPABASE_URL-value");
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let raw = r#"
            [backend]
            url = "https://demo.supabase.co"
        "#;
        let err = Config::from_toml_str(raw, no_env).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("SUPABASE_ANON_KEY")));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            Config::from_toml_str("[backend", no_env),
            Err(Error::Config(_))
        ));
    }
}
