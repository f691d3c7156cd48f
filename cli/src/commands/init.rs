use anyhow::Result;
use clap::Args;
use tracing::info;

#[derive(Args)]
pub struct InitCommand {}

impl InitCommand {
    pub async fn run(&self, cli: &crate::Cli) -> Result<()> {
        let repo = super::open_repository(cli)?;
        let cancel = super::interrupt_token();

        info!("Initializing repository at: {}", repo.config().uri);
        repo.init(&cancel).await?;

        println!("Repository {} is ready", repo.config().uri);
        Ok(())
    }
}
