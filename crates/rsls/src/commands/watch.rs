use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use rsls_workspace::CargoSyncService;
use tracing::info;

use crate::args::Args;
use crate::args::ProjectArgs;
use crate::commands::load_project;
use crate::commands::Command;
use crate::exit::Exit;

#[derive(Debug, Parser)]
pub struct Watch {
    #[command(flatten)]
    project: ProjectArgs,
}

impl Command for Watch {
    async fn execute(&self, _args: &Args) -> Result<Exit> {
        let (root, settings) = load_project(&self.project)?;
        let service = CargoSyncService::new(root, settings)?;

        service.subscribe(|workspace| {
            println!(
                "{}: {} packages, {} library roots",
                workspace.root(),
                workspace.packages().len(),
                workspace.library_roots().len()
            );
        });

        if service.update_now().await.is_err() {
            info!("Initial sync failed, waiting for manifest changes");
        }

        let _watcher = service
            .watch()
            .with_context(|| format!("Failed to watch {}", service.project_dir()))?;
        info!("Watching {} (Ctrl-C to stop)", service.project_dir());

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        service.dispose();

        Ok(Exit::success())
    }
}
