//! Init command handler.

use clap::Args;
use ragchat_core::config::AppConfig;

/// Create a starter .ragchat/config.yaml
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

impl InitCommand {
    pub fn execute(&self, config: &AppConfig) -> anyhow::Result<()> {
        tracing::info!("Executing init command");

        let path = config.write_default_config(self.force)?;
        println!("Wrote {}", path.display());
        println!("Edit it to choose providers and models, then run 'ragchat ingest <paths>'.");
        Ok(())
    }
}
