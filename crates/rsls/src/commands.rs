mod metadata;
mod watch;

use anyhow::Context;
use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Subcommand;
use rsls_conf::Settings;

use crate::args::Args;
use crate::args::ProjectArgs;
use crate::exit::Exit;

pub trait Command {
    async fn execute(&self, args: &Args) -> Result<Exit>;
}

#[derive(Debug, Subcommand)]
pub enum RslsCommand {
    /// Sync the project once and print what cargo reports
    Metadata(self::metadata::Metadata),
    /// Keep the project in sync until interrupted
    Watch(self::watch::Watch),
}

impl RslsCommand {
    pub async fn execute(&self, args: &Args) -> Result<Exit> {
        match self {
            RslsCommand::Metadata(command) => command.execute(args).await,
            RslsCommand::Watch(command) => command.execute(args).await,
        }
    }
}

/// Resolve the project root and load its settings, with CLI flags on top.
fn load_project(project: &ProjectArgs) -> Result<(Utf8PathBuf, Settings)> {
    let root = match &project.path {
        Some(path) => path.clone(),
        None => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            Utf8PathBuf::from_path_buf(cwd)
                .map_err(|path| anyhow::anyhow!("Current directory {} is not UTF-8", path.display()))?
        }
    };
    let root = root
        .canonicalize_utf8()
        .with_context(|| format!("Project directory {root} does not exist"))?;

    let mut settings = Settings::new(root.as_std_path())
        .with_context(|| format!("Failed to load settings for {root}"))?;
    if let Some(cargo) = &project.cargo {
        settings = settings.with_cargo_path(Some(cargo.clone()));
    }
    if project.offline {
        settings = settings.with_offline(true);
    }

    Ok((root, settings))
}
