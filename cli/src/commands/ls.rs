use super::format_bytes;
use anyhow::Result;
use chrono::Local;
use clap::Args;
use resticctl_core::{EntryType, QueryOptions};

#[derive(Args)]
pub struct LsCommand {
    #[arg(help = "Snapshot ID (or \"latest\")")]
    snapshot_id: String,

    #[arg(help = "Path within snapshot")]
    path: String,

    #[arg(long, help = "Output as JSON")]
    json: bool,
}

impl LsCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let repo = super::open_repository(cli)?;
        let cancel = super::interrupt_token();

        let (snapshot, entries) = repo
            .list_directory(&self.snapshot_id, &self.path, QueryOptions::default(), &cancel)
            .await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        println!("snapshot {} of {} at {}",
            snapshot.short_id(),
            snapshot.paths.join(","),
            snapshot.time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"));

        for entry in &entries {
            let kind = match entry.entry_type {
                EntryType::Dir => 'd',
                EntryType::File => '-',
                EntryType::Symlink => 'l',
                EntryType::Other => '?',
            };
            let mtime = entry
                .mtime
                .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!("{} {:>12} {:<16} {}", kind, format_bytes(entry.size), mtime, entry.path);
        }

        Ok(())
    }
}
