use serde::{Deserialize, Serialize};

/// How a backup stream treats output lines that are neither a known
/// progress record nor blank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedOutputPolicy {
    /// Any unrecognized line fails the call.
    Strict,
    /// Unrecognized lines fail the call only if the engine exited
    /// successfully. After a failed exit they stay in the error's output as
    /// diagnostics.
    #[default]
    TolerateOnFailure,
    /// Unrecognized lines are logged and never fail the call.
    Ignore,
}

/// Per-call settings for a backup.
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Local paths to back up. Each must exist before the engine is started.
    pub paths: Vec<String>,
    /// Expanded into one `--exclude <pattern>` pair each.
    pub excludes: Vec<String>,
    /// Expanded into one `--tag <tag>` pair each.
    pub tags: Vec<String>,
    /// Extra flags appended verbatim after everything else.
    pub flags: Vec<String>,
    /// Extra `KEY=VALUE` entries for this call only.
    pub env: Vec<String>,
    pub malformed_output: MalformedOutputPolicy,
}

impl BackupOptions {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_excludes(mut self, excludes: Vec<String>) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_malformed_output(mut self, policy: MalformedOutputPolicy) -> Self {
        self.malformed_output = policy;
        self
    }
}

/// Per-call settings for read-only queries (`snapshots`, `ls`).
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub flags: Vec<String>,
    /// Expanded into one `--tag <tag>` pair each.
    pub tags: Vec<String>,
    pub env: Vec<String>,
}

impl QueryOptions {
    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }
}
