use crate::RepositoryConfig;

/// Host variables copied into every child environment when present.
pub const HOST_ENV_PASSTHROUGH: &[&str] = &["PATH", "HOME", "XDG_CACHE_HOME"];

pub const REPOSITORY_VAR: &str = "RESTIC_REPOSITORY";
pub const PASSWORD_VAR: &str = "RESTIC_PASSWORD";

/// Builds the ordered `KEY=VALUE` environment for one invocation.
///
/// Order: repository location and password, allow-listed host variables
/// found through `lookup`, the handle's extra entries, then `call_env`.
/// Duplicate keys are kept; the last occurrence is the one the child sees.
pub fn build_env<F>(
    config: &RepositoryConfig,
    propagate: &[String],
    call_env: &[String],
    lookup: F,
) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = Vec::with_capacity(2 + propagate.len() + config.extra_env.len() + call_env.len());
    env.push(format!("{}={}", REPOSITORY_VAR, config.uri));
    env.push(format!("{}={}", PASSWORD_VAR, config.password));

    for name in propagate {
        if let Some(value) = lookup(name) {
            env.push(format!("{}={}", name, value));
        }
    }

    env.extend(config.extra_env.iter().cloned());
    env.extend(call_env.iter().cloned());
    env
}

/// Host environment lookup used outside of tests.
pub fn host_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Splits a `KEY=VALUE` entry at the first `=`.
pub fn split_entry(entry: &str) -> Option<(&str, &str)> {
    let (key, value) = entry.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}
