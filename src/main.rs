use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rollerline_lib::run(rollerline_lib::Cli::parse()).await
}
