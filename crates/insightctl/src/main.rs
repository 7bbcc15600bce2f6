//! insightctl is a CLI for acquiring a fleet of deployed form
//! applications and running analytical queries over the archive corpus.

mod download;
mod logging;
mod report;

use clap::Parser;

#[derive(Debug, Parser)]
#[clap(author, name = "insightctl", version)]
struct Insightctl {
    #[clap(flatten)]
    log_args: logging::LogArgs,

    /// Shorthand for --log-level=debug
    #[clap(long, global = true)]
    debug: bool,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
#[clap(rename_all = "kebab-case")]
enum Subcommand {
    /// Discover deployed apps and sync their source archives to disk
    Download(download::DownloadArgs),
    /// Run a canned analytical report over the acquired corpus
    Report(report::ReportArgs),
}

fn main() -> anyhow::Result<()> {
    let mut cli = Insightctl::parse();
    if cli.debug {
        cli.log_args.level = logging::LogLevel::Debug;
    }
    logging::init_logging(&cli.log_args);

    let result = match cli.subcommand {
        Subcommand::Download(args) => download::run(args),
        Subcommand::Report(args) => report::run(args),
    };
    if let Err(err) = result.as_ref() {
        tracing::error!(error = ?err, "subcommand failed");
    }
    result
}
