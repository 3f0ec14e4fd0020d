//! Connection configuration
//!
//! The configuration file declares one or more environments, each holding
//! connection descriptors keyed by connection name. The connection `type`
//! discriminator is closed: anything other than the recognized backends is
//! a hard error.

use crate::{Error, FileSystem, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A single connection descriptor, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Connection {
    Bigquery {
        #[serde(default)]
        service_account_json: Option<String>,
        #[serde(default)]
        service_account_file: Option<String>,
        project_id: String,
    },
    Snowflake {
        account: String,
        username: String,
        password: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        database: Option<String>,
        #[serde(default)]
        schema: Option<String>,
        #[serde(default)]
        warehouse: Option<String>,
    },
}

impl Connection {
    /// The type discriminator as written in the config file.
    pub fn type_name(&self) -> &'static str {
        match self {
            Connection::Bigquery { .. } => "bigquery",
            Connection::Snowflake { .. } => "snowflake",
        }
    }
}

/// One environment's connections, keyed by connection name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub connections: BTreeMap<String, Connection>,
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub environments: BTreeMap<String, Environment>,

    /// Environment selected when the caller names none.
    #[serde(default)]
    pub default_environment: Option<String>,
}

impl Config {
    /// Load the configuration from a file. An unrecognized connection type
    /// fails the load.
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let content = fs.read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Look up an environment, falling back to the configured default and
    /// then to `"default"`.
    pub fn environment(&self, name: Option<&str>) -> Result<&Environment> {
        let name = name
            .or(self.default_environment.as_deref())
            .unwrap_or("default");
        self.environments
            .get(name)
            .ok_or_else(|| Error::Config(format!("environment '{name}' is not defined")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
default_environment: default
environments:
  default:
    connections:
      gcp-main:
        type: bigquery
        project_id: my-project
        service_account_file: /secrets/sa.json
      sf-main:
        type: snowflake
        account: acme-eu
        username: loader
        password: hunter2
        warehouse: LOADING
"#;

    #[test]
    fn test_parses_known_connection_types() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let env = config.environment(None).unwrap();

        match &env.connections["gcp-main"] {
            Connection::Bigquery {
                project_id,
                service_account_file,
                ..
            } => {
                assert_eq!(project_id, "my-project");
                assert_eq!(service_account_file.as_deref(), Some("/secrets/sa.json"));
            }
            other => panic!("expected bigquery, got {other:?}"),
        }
        assert_eq!(env.connections["sf-main"].type_name(), "snowflake");
    }

    #[test]
    fn test_unknown_connection_type_is_hard_error() {
        let yaml = r#"
environments:
  default:
    connections:
      bad:
        type: duckdb
        path: /tmp/db
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_environment_errors() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert!(config.environment(Some("staging")).is_err());
    }

    #[test]
    fn test_named_environment_lookup() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert!(config.environment(Some("default")).is_ok());
    }
}
