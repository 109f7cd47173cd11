//! tidalauth binary entry point.

use clap::Parser;
use tidalauth::cli::{execute, init_tracing, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let code = execute(cli).await;
    std::process::exit(code.code());
}
