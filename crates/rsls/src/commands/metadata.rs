use std::fmt::Write as _;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use rsls_project::CargoWorkspace;
use rsls_workspace::CargoSyncService;

use crate::args::Args;
use crate::args::ProjectArgs;
use crate::commands::load_project;
use crate::commands::Command;
use crate::exit::Exit;

#[derive(Debug, Parser)]
pub struct Metadata {
    #[command(flatten)]
    project: ProjectArgs,

    /// Print the whole workspace as JSON.
    #[arg(long)]
    json: bool,
}

impl Command for Metadata {
    async fn execute(&self, _args: &Args) -> Result<Exit> {
        let (root, settings) = load_project(&self.project)?;
        let service = CargoSyncService::new(root, settings)?;

        // the cause is already reported through the service's notifier
        let Ok(workspace) = service.update_now().await else {
            return Ok(Exit::error().with_message(format!("Failed to sync {}", service.name())));
        };

        if self.json {
            let json = serde_json::to_string_pretty(&*workspace)
                .context("Failed to serialize workspace")?;
            println!("{json}");
        } else {
            print!("{}", summary(&workspace));
        }
        Ok(Exit::success())
    }
}

fn summary(workspace: &CargoWorkspace) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Workspace: {}", workspace.root());
    let _ = writeln!(out, "Target directory: {}", workspace.target_directory());

    let members: Vec<_> = workspace.workspace_packages().collect();
    let _ = writeln!(out, "Members ({}):", members.len());
    for package in members {
        let _ = writeln!(out, "  {} {}", package.name, package.version);
    }

    let roots = workspace.library_roots();
    let _ = writeln!(out, "Library roots ({}):", roots.len());
    for root in roots {
        let _ = writeln!(out, "  {} {}  {}", root.name, root.version, root.root);
    }
    out
}
