use clap::{Parser, Subcommand};

use comment_board::{
    config::{ProxyConfig, SiteConfig},
    init_tracing, start_proxy, start_site,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the authenticated comment store proxy
    Proxy,

    /// Serve the site handlers that sit in front of the proxy
    Site,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Proxy => start_proxy(ProxyConfig::load()?).await,
        Command::Site => start_site(SiteConfig::load()?).await,
    }
}
