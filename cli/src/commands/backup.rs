use super::format_bytes;
use anyhow::{anyhow, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use resticctl_core::{BackupOptions, BackupSummary, MalformedOutputPolicy, ProgressEvent};
use tracing::info;

#[derive(Args)]
pub struct BackupCommand {
    #[arg(help = "Paths to backup")]
    paths: Vec<String>,

    #[arg(long, help = "Backup tags")]
    tag: Vec<String>,

    #[arg(long, help = "Exclude patterns")]
    exclude: Vec<String>,

    #[arg(long, help = "Hostname override")]
    hostname: Option<String>,

    #[arg(long, help = "Dry run - don't write a snapshot")]
    dry_run: bool,

    #[arg(long, help = "Fail on any output line restic did not emit as JSON")]
    strict: bool,
}

impl BackupCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        if self.paths.is_empty() {
            return Err(anyhow!("At least one path must be specified"));
        }

        let repo = super::open_repository(cli)?;
        let cancel = super::interrupt_token();

        let mut flags = Vec::new();
        if let Some(hostname) = &self.hostname {
            flags.push("--host".to_string());
            flags.push(hostname.clone());
        }
        if self.dry_run {
            flags.push("--dry-run".to_string());
        }

        let policy = if self.strict {
            MalformedOutputPolicy::Strict
        } else {
            MalformedOutputPolicy::TolerateOnFailure
        };
        let options = BackupOptions::new(self.paths.iter().cloned())
            .with_tags(self.tag.clone())
            .with_excludes(self.exclude.clone())
            .with_flags(flags)
            .with_malformed_output(policy);

        info!("Starting backup of {} paths", self.paths.len());

        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}")
                .unwrap(),
        );

        let result = repo
            .backup(options, &cancel, |event| match event {
                ProgressEvent::Status(status) => {
                    pb.set_length(status.total_bytes);
                    pb.set_position(status.bytes_done);
                    let current = status.current_files.first().map(String::as_str).unwrap_or("");
                    pb.set_message(format!(
                        "{}/{} files {}",
                        status.files_done, status.total_files, current
                    ));
                }
                ProgressEvent::FileError(error) => {
                    pb.println(format!(
                        "warning: {} ({}): {}",
                        error.item,
                        error.during,
                        error.message()
                    ));
                }
                ProgressEvent::Summary(_) => pb.finish_and_clear(),
            })
            .await;

        let summary = match result {
            Ok(summary) => {
                println!("✅ Backup completed successfully!");
                summary
            }
            Err(e) => {
                pb.abandon();
                if let Some(summary) = e.summary() {
                    print_summary(summary);
                    return Err(anyhow!("⚠️  Backup finished with errors: {}", e));
                }
                return Err(e.into());
            }
        };

        print_summary(&summary);
        Ok(())
    }
}

fn print_summary(summary: &BackupSummary) {
    match &summary.snapshot_id {
        Some(id) => println!("📸 Snapshot: {}", id),
        None => println!("📸 Snapshot: none (dry run)"),
    }
    println!(
        "📁 Files: {} new, {} changed, {} unmodified",
        summary.files_new, summary.files_changed, summary.files_unmodified
    );
    println!(
        "💾 Processed: {} in {:.1}s, added {}",
        format_bytes(summary.total_bytes_processed),
        summary.total_duration,
        format_bytes(summary.data_added)
    );
}
