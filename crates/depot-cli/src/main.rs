//! depot - artifact repository tool

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use depot_cli::cmd;
use depot_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let quiet = cli.quiet;

    match cli.command {
        Commands::Init {
            repo,
            name,
            compressed,
        } => cmd::init::init(&repo, &name, compressed, quiet),
        Commands::List { repo, classifier } => cmd::list::list(&repo, classifier.as_deref()).await,
        Commands::Add {
            repo,
            file,
            key,
            properties,
        } => cmd::add::add(&repo, &file, &key, &properties, quiet).await,
        Commands::Remove { repo, keys, all } => cmd::remove::remove(&repo, &keys, all, quiet).await,
        Commands::Fetch {
            repo,
            keys,
            out,
            raw,
        } => cmd::fetch::fetch(&repo, &keys, &out, raw, quiet).await,
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    }
}
