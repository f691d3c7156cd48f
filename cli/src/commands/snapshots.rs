use anyhow::{anyhow, Result};
use chrono::Local;
use clap::Args;
use resticctl_core::QueryOptions;

#[derive(Args)]
pub struct SnapshotsCommand {
    #[arg(long, help = "Output format (table, json)")]
    format: Option<String>,

    #[arg(long, help = "Filter by hostname")]
    hostname: Option<String>,

    #[arg(long, help = "Filter by tag")]
    tag: Vec<String>,

    #[arg(long, help = "Filter by path")]
    path: Vec<String>,

    #[arg(long, help = "Show latest N snapshots")]
    latest: Option<usize>,
}

impl SnapshotsCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let format = self.format.as_deref().unwrap_or("table");
        if format != "table" && format != "json" {
            return Err(anyhow!("Unsupported format: {}", format));
        }

        let repo = super::open_repository(cli)?;
        let cancel = super::interrupt_token();

        let mut flags = Vec::new();
        if let Some(hostname) = &self.hostname {
            flags.push("--host".to_string());
            flags.push(hostname.clone());
        }
        for path in &self.path {
            flags.push("--path".to_string());
            flags.push(path.clone());
        }
        if let Some(latest) = self.latest {
            flags.push("--latest".to_string());
            flags.push(latest.to_string());
        }
        let options = QueryOptions::default()
            .with_tags(self.tag.clone())
            .with_flags(flags);

        let snapshots = repo.snapshots(options, &cancel).await?;

        if format == "json" {
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
            return Ok(());
        }

        if snapshots.is_empty() {
            println!("No snapshots found");
            return Ok(());
        }

        println!("{:<10} {:<20} {:<15} {:<20} {}",
            "ID", "Date", "Host", "Tags", "Paths");
        println!("{:-<100}", "");

        for snapshot in &snapshots {
            println!("{:<10} {:<20} {:<15} {:<20} {}",
                snapshot.short_id(),
                snapshot.time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                snapshot.hostname,
                snapshot.tags.join(","),
                snapshot.paths.join(",")
            );
        }
        println!("{} snapshots", snapshots.len());

        Ok(())
    }
}
