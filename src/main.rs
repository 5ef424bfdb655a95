use clap::Parser;
use log::{error, info};

use cellyard::cli::{self, Cli, VERSION};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();

    let cli = Cli::parse();
    info!("cellyard {VERSION}");

    if let Err(e) = cli::run(cli).await {
        error!("{e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
