//! Backend credentials.
//!
//! A credentials file maps a dialect key to a flat table of connection
//! parameters:
//!
//! ```yaml
//! postgresql:
//!   host: db.internal
//!   user: loader
//!   password: secret
//!   dbname: staging
//! sqlite:
//!   host: ./staging.db
//! ```
//!
//! `.yml`/`.yaml` files are read as YAML, anything else as JSON.

use std::{collections::BTreeMap, fmt, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use itertools::Itertools;

use crate::{dialect::Dialect, error::LoaderError};

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    params: BTreeMap<String, String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.params {
            if key == "password" {
                map.entry(key, &"***");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Credentials
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            params: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl Credentials {
    pub fn new(params: BTreeMap<String, String>) -> Self {
        Self { params }
    }

    /// Credentials for a SQLite database file.
    pub fn sqlite(path: impl AsRef<Path>) -> Self {
        [("host", path.as_ref().to_string_lossy().into_owned())]
            .into_iter()
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Fails with a configuration error naming every missing key.
    pub fn validate(&self, dialect: Dialect) -> Result<(), LoaderError> {
        let missing: Vec<&str> = dialect
            .required_credential_keys()
            .iter()
            .copied()
            .filter(|key| self.get(key).is_none_or(|value| value.trim().is_empty()))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(LoaderError::Configuration(format!(
                "{dialect} credentials are missing required parameter(s): {}",
                missing.join(",")
            )))
        }
    }

    fn required(&self, key: &str) -> Result<&str, LoaderError> {
        self.get(key).ok_or_else(|| {
            LoaderError::Configuration(format!("credentials are missing '{key}'"))
        })
    }

    /// Driver connection string for `dialect`; SQLite returns the database path.
    pub fn connection_string(&self, dialect: Dialect) -> Result<String, LoaderError> {
        self.validate(dialect)?;
        let host = self.required("host")?;
        let port = self.get("port");
        Ok(match dialect {
            Dialect::Postgres => {
                let mut conn = format!(
                    "host={host} user={} password={} dbname={}",
                    self.required("user")?,
                    self.required("password")?,
                    self.required("dbname")?
                );
                if let Some(port) = port {
                    conn.push_str(&format!(" port={port}"));
                }
                conn
            }
            Dialect::Oracle => format!(
                "{}/{}@{host}{}/{}",
                self.required("user")?,
                self.required("password")?,
                port.map(|p| format!(":{p}")).unwrap_or_default(),
                self.required("service")?
            ),
            Dialect::MySql => format!(
                "mysql://{}:{}@{host}{}/{}",
                self.required("user")?,
                self.required("password")?,
                port.map(|p| format!(":{p}")).unwrap_or_default(),
                self.required("dbname")?
            ),
            Dialect::SqlServer => format!(
                "DRIVER={{ODBC Driver 17 for SQL Server}};SERVER={host}{};DATABASE={};UID={};PWD={}",
                port.map(|p| format!(",{p}")).unwrap_or_default(),
                self.required("dbname")?,
                self.required("user")?,
                self.required("password")?
            ),
            Dialect::Sqlite => host.to_string(),
        })
    }
}

/// Every credentials entry in a file, keyed by dialect key.
#[derive(Debug, Clone, Default)]
pub struct CredentialsFile {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl CredentialsFile {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Opening credentials file {path:?}"))?;
        let reader = BufReader::new(file);
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));
        let raw: BTreeMap<String, BTreeMap<String, serde_json::Value>> = if is_yaml {
            serde_yaml::from_reader(reader).context("Parsing credentials YAML")?
        } else {
            serde_json::from_reader(reader).context("Parsing credentials JSON")?
        };
        let sections = raw
            .into_iter()
            .map(|(section, params)| {
                let params = params
                    .into_iter()
                    .map(|(key, value)| (key, scalar_to_string(value)))
                    .collect();
                (section.to_ascii_lowercase(), params)
            })
            .collect();
        Ok(Self { sections })
    }

    pub fn dialects(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Validated credentials for `dialect`.
    pub fn credentials(&self, dialect: Dialect) -> Result<Credentials, LoaderError> {
        let params = self.sections.get(dialect.key()).ok_or_else(|| {
            LoaderError::Configuration(format!(
                "credentials file has no '{}' section (found: {})",
                dialect.key(),
                self.dialects().join(", ")
            ))
        })?;
        let credentials = Credentials::new(params.clone());
        credentials.validate(dialect)?;
        Ok(credentials)
    }
}

fn scalar_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
