use clap::Parser;
use fire_drawdown::cli::{self, Cli, Command};
use tracing::error;

#[tokio::main]
async fn main() {
    cli::init_tracing();
    let args = Cli::parse();

    let result = match args.command {
        Command::Serve(serve_args) => cli::serve(serve_args).await,
        Command::Simulate(simulate_args) => {
            cli::simulate(&simulate_args).map(|report| println!("{report}"))
        }
    };

    if let Err(e) = result {
        error!(error = %e, "fire-drawdown failed");
        std::process::exit(1);
    }
}
