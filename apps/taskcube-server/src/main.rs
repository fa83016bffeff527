use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "taskcube-server", about = "Multi-step container-job orchestrator")]
struct Args {
    #[arg(long, default_value = "./config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    taskcube_server::run(args.config).await
}
