use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// Where a project's media lives and how its capture time is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// URL prefix of the project's files, e.g. `s3://sipecam-open-data/data/`.
    pub media_root: String,
    /// Key in `files.file_metadata` holding the capture time.
    pub datetime_key: String,
}

impl ProjectSettings {
    pub fn new(media_root: impl Into<String>, datetime_key: impl Into<String>) -> Self {
        Self {
            media_root: media_root.into(),
            datetime_key: datetime_key.into(),
        }
    }

    /// Absolute URL of a dataset item (a path relative to the media root).
    pub fn media_url(&self, item: &str) -> String {
        let item = item.trim_start_matches('/');
        if self.media_root.ends_with('/') {
            format!("{}{item}", self.media_root)
        } else {
            format!("{}/{item}", self.media_root)
        }
    }
}

/// Project title -> settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectCatalog {
    projects: BTreeMap<String, ProjectSettings>,
}

impl Default for ProjectCatalog {
    /// The projects the platform currently hosts.
    fn default() -> Self {
        let projects = [
            (
                "Indonesia",
                ProjectSettings::new("s3://be-upload/ProcessedData/data/", "DateTimeOriginal"),
            ),
            (
                "SiPeCaM",
                ProjectSettings::new("s3://sipecam-open-data/data/", "DateTimeOriginal"),
            ),
            (
                "Northern Cluster Mexico",
                ProjectSettings::new(
                    "s3://be-upload/FieldData/230620_NHUM_MEX_NC/data/",
                    "Datetime",
                ),
            ),
        ]
        .into_iter()
        .map(|(title, settings)| (title.to_string(), settings))
        .collect();
        Self { projects }
    }
}

impl ProjectCatalog {
    /// Read a catalog from a JSON object of `{ "<title>": {media_root, datetime_key} }`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project settings from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid project settings in {}", path.display()))
    }

    pub fn get(&self, project: &str) -> Result<&ProjectSettings> {
        self.projects.get(project).with_context(|| {
            let known: Vec<&str> = self.projects.keys().map(String::as_str).collect();
            format!(
                "No settings for project '{project}'. Known projects: {}.\n\
                 Set BALAM_PROJECTS_PATH to a JSON file that describes it.",
                known.join(", ")
            )
        })
    }

    pub fn insert(&mut self, project: impl Into<String>, settings: ProjectSettings) {
        self.projects.insert(project.into(), settings);
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.projects.keys().map(String::as_str)
    }
}

/// Central configuration loaded from environment variables.
///
/// Database credentials come from env vars (never hardcoded). The .env
/// file is loaded automatically at startup via dotenvy.
pub struct Config {
    pub db_path: String,
    /// PostgreSQL connection URL (when set and starts with postgres://, uses Postgres backend)
    pub database_url: Option<String>,
    /// User recorded as the author of stored observations.
    pub username: String,
    pub projects: ProjectCatalog,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Only db_path has a default. DATABASE_URL wins over the DB_BALAM_*
    /// parts when both are present.
    pub fn load() -> Result<Self> {
        let projects = match env::var("BALAM_PROJECTS_PATH") {
            Ok(path) if !path.is_empty() => ProjectCatalog::from_file(Path::new(&path))?,
            _ => ProjectCatalog::default(),
        };

        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .or_else(postgres_url_from_parts);

        Ok(Self {
            db_path: env::var("BALAM_DB_PATH").unwrap_or_else(|_| "./balam.db".to_string()),
            database_url,
            username: env::var("BALAM_USERNAME").unwrap_or_default(),
            projects,
        })
    }

    /// True when the configured URL selects the PostgreSQL backend.
    pub fn uses_postgres(&self) -> bool {
        self.database_url
            .as_deref()
            .is_some_and(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"))
    }

    /// Check that an author username is configured.
    /// Call this before storing observations.
    pub fn require_username(&self) -> Result<&str> {
        if self.username.is_empty() {
            anyhow::bail!(
                "BALAM_USERNAME not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(&self.username)
    }
}

/// Assemble a postgres URL from DB_BALAM_HOST / PORT / NAME / USER / PASSWORD.
fn postgres_url_from_parts() -> Option<String> {
    let host = env::var("DB_BALAM_HOST").ok().filter(|h| !h.is_empty())?;
    let name = env::var("DB_BALAM_NAME").ok().filter(|n| !n.is_empty())?;
    let port = env::var("DB_BALAM_PORT").unwrap_or_else(|_| "5432".to_string());
    let user = env::var("DB_BALAM_USER").unwrap_or_default();
    let password = env::var("DB_BALAM_PASSWORD").unwrap_or_default();
    Some(build_postgres_url(&host, &port, &name, &user, &password))
}

/// Everything except the RFC 3986 unreserved characters.
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn build_postgres_url(host: &str, port: &str, name: &str, user: &str, password: &str) -> String {
    let user = utf8_percent_encode(user, USERINFO).to_string();
    let password = utf8_percent_encode(password, USERINFO).to_string();
    let credentials = match (user.is_empty(), password.is_empty()) {
        (true, _) => String::new(),
        (false, true) => format!("{user}@"),
        (false, false) => format!("{user}:{password}@"),
    };
    format!("postgres://{credentials}{host}:{port}/{name}")
}
