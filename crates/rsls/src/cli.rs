use anyhow::Result;
use clap::Parser;

use crate::args::Args;
use crate::commands::RslsCommand;
use crate::exit::Exit;
use crate::logging;

/// The main CLI structure that defines the command-line interface
#[derive(Parser)]
#[command(name = "rsls")]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: RslsCommand,

    #[command(flatten)]
    pub args: Args,
}

/// Parse CLI arguments and execute the chosen command
pub async fn run(args: Vec<String>) -> Result<Exit> {
    let cli = Cli::try_parse_from(args).unwrap_or_else(|e| {
        e.exit();
    });

    let _guard = logging::init_tracing(&cli.args.global);

    cli.command.execute(&cli.args).await
}
