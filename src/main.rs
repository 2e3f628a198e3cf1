use clap::Parser;
use lean_embed_viz::cli::{Cli, GetVerbosity};
use lean_embed_viz::logging::setup_logger;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = setup_logger(cli.cmd.get_verbosity().tracing_level_filter(), cli.ansi()) {
        eprintln!("{e}");
    }

    let code = match cli.cmd.run().await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            if e.is_client_error() { 2 } else { 1 }
        }
    };
    std::process::exit(code);
}
