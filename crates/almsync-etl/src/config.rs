//! YAML run configuration.
//!
//! ```yaml
//! ac:
//!   url: https://rally1.rallydev.com/slm/webservice/v2.0
//!   apikey: _abc123
//!   workspace: /workspace/1234
//!   project: /project/5678
//!   fetch: CreationDate,ObjectID,State,PlanEstimate,ScheduleState,Owner
//!   query: (LastUpdateDate > "2017-01-01")
//!   resolveUser: false
//! db:
//!   name: rally
//!   user: postgres
//!   password: secret
//!   host: localhost
//!   port: 5432
//!   tables: Defect, HierarchicalRequirement
//!   history: true
//! ```

use almsync_schema::{FieldAllowlist, FieldMatch, TableMode, TranslatePolicy, UserResolution};
use almsync_store::PgParams;
use almsync_wsapi::WsapiConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Largest page the ALM serves.
pub const MAX_PAGE_SIZE: u32 = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub ac: AlmSettings,
    pub db: DbSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AlmSettings {
    pub url: String,
    #[serde(default)]
    pub apikey: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_true")]
    pub project_scope_down: bool,
    /// Attribute allowlist, comma or space separated.
    pub fetch: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_page_size")]
    pub pagesize: u32,
    /// Store user references as display names instead of ObjectIDs.
    #[serde(default)]
    pub resolve_user: bool,
    #[serde(default)]
    pub field_match: FieldMatch,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbSettings {
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Work-item types to load, comma or space separated.
    pub tables: String,
    /// Versioned tables instead of single-snapshot tables.
    #[serde(default)]
    pub history: bool,
    /// Keep the CSV staging file of each entity here.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entities().is_empty() {
            return Err(ConfigError::Invalid("db.tables names no work item types".into()));
        }
        if self.allowlist().fields().is_empty() {
            return Err(ConfigError::Invalid("ac.fetch names no attributes".into()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.ac.pagesize) {
            return Err(ConfigError::Invalid(format!(
                "ac.pagesize must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.ac.pagesize
            )));
        }
        self.wsapi_config()?;
        Ok(())
    }

    /// Configured work-item types, in order.
    pub fn entities(&self) -> Vec<String> {
        self.db
            .tables
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn allowlist(&self) -> FieldAllowlist {
        FieldAllowlist::parse(&self.ac.fetch, self.ac.field_match)
    }

    pub fn policy(&self) -> TranslatePolicy {
        TranslatePolicy {
            users: if self.ac.resolve_user {
                UserResolution::ByName
            } else {
                UserResolution::ById
            },
        }
    }

    pub fn table_mode(&self) -> TableMode {
        if self.db.history {
            TableMode::Versioned
        } else {
            TableMode::Snapshot
        }
    }

    pub fn wsapi_config(&self) -> Result<WsapiConfig, ConfigError> {
        let mut config = WsapiConfig::new(&self.ac.url)
            .map_err(|e| ConfigError::Invalid(format!("ac.url: {e}")))?;
        config.api_key = self.ac.apikey.clone();
        config.workspace = self.ac.workspace.clone();
        config.project = self.ac.project.clone();
        config.project_scope_down = self.ac.project_scope_down;
        Ok(config)
    }

    pub fn pg_params(&self) -> PgParams {
        PgParams {
            host: self.db.host.clone(),
            port: self.db.port,
            dbname: self.db.name.clone(),
            user: self.db.user.clone(),
            password: self.db.password.clone(),
        }
    }
}
