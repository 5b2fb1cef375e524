use clap::Parser;
use delivery_cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    delivery_cli::run(cli).await
}
