pub mod backup;
pub mod init;
pub mod ls;
pub mod snapshots;

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use resticctl_core::{CancellationToken, RepositoryConfig, RepositoryHandle};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Resolves the repository definition: config file first, then flags and
/// environment, then an interactive prompt for a missing password.
pub fn open_repository(cli: &crate::Cli) -> Result<RepositoryHandle> {
    let mut config = match config_path(cli) {
        Some(path) => {
            debug!("Loading repository config from {}", path.display());
            RepositoryConfig::from_file(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => RepositoryConfig::default(),
    };

    if let Some(repo) = &cli.repo {
        config.uri = repo.clone();
    }
    if let Some(binary) = &cli.binary {
        config.binary = binary.clone();
    }
    if let Some(password) = &cli.password {
        config.password = password.clone();
    }

    if config.uri.is_empty() {
        return Err(anyhow!("Repository required (--repo, RESTIC_REPOSITORY or config file)"));
    }

    if config.password.is_empty() {
        config.password = prompt_password().ok_or_else(|| anyhow!("Password required"))?;
    }

    config.validate()?;
    Ok(RepositoryHandle::new(config))
}

fn config_path(cli: &crate::Cli) -> Option<PathBuf> {
    if let Some(path) = &cli.config {
        return Some(path.clone());
    }
    let dirs = ProjectDirs::from("", "", "resticctl")?;
    let path = dirs.config_dir().join("config.toml");
    path.exists().then_some(path)
}

fn prompt_password() -> Option<String> {
    print!("Enter repository password: ");
    io::stdout().flush().ok()?;
    rpassword::read_password().ok()
}

/// Token cancelled on Ctrl-C, which kills the running engine process.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, stopping restic");
                trigger.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
    token
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
