//! `.burrow.toml` settings, loaded once at startup and passed down explicitly.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{BurrowError, Result};

pub const CONFIG_FILE: &str = ".burrow.toml";

/// Default directory for dump files, relative to the project root.
pub const DEFAULT_BACKUP_DIR: &str = ".burrow";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    /// The working database the snapshots are taken from and restored into.
    pub database: String,
    /// Catalog scope; snapshots from other projects stay invisible.
    pub project: String,
    pub backup_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            host: String::new(),
            port: 0,
            database: String::new(),
            project: String::new(),
            backup_dir: DEFAULT_BACKUP_DIR.to_string(),
            remote: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RemoteSettings {
    pub bucket: String,
    pub region: String,
    /// Key prefix within the bucket under which dump files live.
    pub prefix: String,
    /// Static credentials; when omitted the ambient AWS chain is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
}

impl Settings {
    /// Reads and validates the config file in the current directory.
    pub fn load() -> Result<Settings> {
        let path = Path::new(CONFIG_FILE);
        if !path.exists() {
            return Err(BurrowError::Config(format!(
                "config file {CONFIG_FILE} not found in the current directory"
            )));
        }
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)
            .map_err(|e| BurrowError::Config(format!("could not parse {CONFIG_FILE}: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks that every connection field carries a value. Reports all
    /// offending keys at once so the file can be fixed in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.username.is_empty() {
            missing.push("username");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        if self.host.is_empty() {
            missing.push("host");
        }
        if self.port == 0 {
            missing.push("port");
        }
        if self.database.is_empty() {
            missing.push("database");
        }
        if self.project.is_empty() {
            missing.push("project");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BurrowError::Config(format!(
                "missing or empty values in {CONFIG_FILE}: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn save(&self) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BurrowError::Config(format!("could not encode settings: {e}")))?;
        fs::write(CONFIG_FILE, content)?;
        Ok(())
    }

    /// The `[remote]` section, required by export/download commands.
    pub fn remote(&self) -> Result<&RemoteSettings> {
        self.remote.as_ref().ok_or_else(|| {
            BurrowError::Config(format!("no [remote] section in {CONFIG_FILE}"))
        })
    }
}

impl RemoteSettings {
    /// Command-line flags shadow the config file values.
    pub fn apply_overrides(
        &mut self,
        bucket: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
    ) {
        if let Some(bucket) = bucket {
            self.bucket = bucket;
        }
        if let Some(region) = region {
            self.region = region;
        }
        if let Some(prefix) = prefix {
            self.prefix = prefix;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.bucket.is_empty() {
            missing.push("bucket");
        }
        if self.region.is_empty() {
            missing.push("region");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BurrowError::Config(format!(
                "missing or empty values in [remote]: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Wizard default for the project name: the current directory's name.
pub fn default_project_name() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_file() {
        let content = r#"
            username = "postgres"
            password = "secret"
            host = "127.0.0.1"
            port = 5432
            database = "devproject"
            project = "testproject"

            [remote]
            bucket = "backups"
            region = "eu-west-3"
            prefix = "dumps/"
        "#;
        let settings: Settings = toml::from_str(content).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.port, 5432);
        assert_eq!(settings.backup_dir, DEFAULT_BACKUP_DIR);
        let remote = settings.remote().unwrap();
        assert_eq!(remote.bucket, "backups");
        assert!(remote.access_key_id.is_none());
    }

    #[test]
    fn validate_reports_every_missing_key() {
        let settings: Settings = toml::from_str("username = \"postgres\"").unwrap();
        let err = settings.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("password"));
        assert!(message.contains("host"));
        assert!(message.contains("port"));
        assert!(message.contains("database"));
        assert!(message.contains("project"));
        assert!(!message.contains("username"));
    }

    #[test]
    fn remote_section_is_optional_until_needed() {
        let content = r#"
            username = "postgres"
            password = "secret"
            host = "127.0.0.1"
            port = 5432
            database = "devproject"
            project = "testproject"
        "#;
        let settings: Settings = toml::from_str(content).unwrap();
        settings.validate().unwrap();
        assert!(settings.remote().is_err());
    }

    #[test]
    fn overrides_shadow_config_values() {
        let mut remote = RemoteSettings {
            bucket: "backups".into(),
            region: "eu-west-3".into(),
            prefix: String::new(),
            ..Default::default()
        };
        remote.apply_overrides(Some("other".into()), None, Some("team/".into()));
        assert_eq!(remote.bucket, "other");
        assert_eq!(remote.region, "eu-west-3");
        assert_eq!(remote.prefix, "team/");
    }

    #[test]
    fn settings_round_trip_through_toml() {
        let mut settings = Settings {
            username: "postgres".into(),
            password: "secret".into(),
            host: "localhost".into(),
            port: 5433,
            database: "dev".into(),
            project: "proj".into(),
            ..Default::default()
        };
        settings.remote = Some(RemoteSettings {
            bucket: "b".into(),
            region: "r".into(),
            ..Default::default()
        });
        let encoded = toml::to_string_pretty(&settings).unwrap();
        let decoded: Settings = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded.port, 5433);
        assert_eq!(decoded.remote.unwrap().bucket, "b");
    }
}
