use camino::Utf8PathBuf;
use clap::Parser;

#[derive(Parser)]
pub struct Args {
    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Do not print any output.
    #[arg(global = true, long, short, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Use verbose output.
    #[arg(global = true, action = clap::ArgAction::Count, long, short, conflicts_with = "quiet")]
    pub verbose: u8,
}

/// Which project to sync and how to call cargo for it.
#[derive(Parser, Debug, Clone)]
pub struct ProjectArgs {
    /// Project directory. Defaults to the current directory.
    pub path: Option<Utf8PathBuf>,

    /// Cargo binary to use instead of the one on PATH.
    #[arg(long, value_name = "PATH")]
    pub cargo: Option<Utf8PathBuf>,

    /// Pass `--offline` to cargo.
    #[arg(long)]
    pub offline: bool,
}
