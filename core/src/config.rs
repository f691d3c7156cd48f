use crate::env::HOST_ENV_PASSTHROUGH;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Definition of one engine-managed repository.
///
/// ```toml
/// uri = "s3:https://s3.amazonaws.com/bucket/backups"
/// password = "secret"
/// binary = "/usr/local/bin/restic"
/// extra_args = ["--limit-upload", "2048"]
/// extra_env = ["AWS_ACCESS_KEY_ID=AKIA..."]
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository location, exported as `RESTIC_REPOSITORY`.
    pub uri: String,

    /// Repository secret, exported as `RESTIC_PASSWORD`. Never serialized.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Path to the engine binary (default: `restic`, resolved through `PATH`).
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Flags appended to every invocation after the operation's fixed flags.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// `KEY=VALUE` entries added to every invocation's environment.
    #[serde(default)]
    pub extra_env: Vec<String>,

    /// Host variables copied into the child environment when set.
    #[serde(default = "default_propagate_env")]
    pub propagate_env: Vec<String>,
}

fn default_binary() -> PathBuf {
    PathBuf::from("restic")
}

fn default_propagate_env() -> Vec<String> {
    HOST_ENV_PASSTHROUGH.iter().map(|name| name.to_string()).collect()
}

// Entry values in extra_env usually carry backend credentials too.
impl fmt::Debug for RepositoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self
            .extra_env
            .iter()
            .map(|entry| entry.split('=').next().unwrap_or_default())
            .collect();
        f.debug_struct("RepositoryConfig")
            .field("uri", &self.uri)
            .field("password", &"[REDACTED]")
            .field("binary", &self.binary)
            .field("extra_args", &self.extra_args)
            .field("extra_env", &env_keys)
            .field("propagate_env", &self.propagate_env)
            .finish()
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            password: String::new(),
            binary: default_binary(),
            extra_args: Vec::new(),
            extra_env: Vec::new(),
            propagate_env: default_propagate_env(),
        }
    }
}

impl RepositoryConfig {
    pub fn new(uri: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_extra_env(mut self, env: Vec<String>) -> Self {
        self.extra_env = env;
        self
    }

    pub fn with_propagate_env(mut self, names: Vec<String>) -> Self {
        self.propagate_env = names;
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RepositoryConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.uri.is_empty() {
            return Err(Error::Config("repository uri must not be empty".to_string()));
        }
        if let Some(entry) = self.extra_env.iter().find(|entry| !entry.contains('=')) {
            return Err(Error::Config(format!(
                "extra_env entry {:?} is not of the form KEY=VALUE",
                entry
            )));
        }
        Ok(())
    }
}
