use clap::Parser;
use ehs_sentinel::cli::Cli;
use ehs_sentinel::supervisor;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn setup_logging(verbosity: &clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.tracing_level_filter().to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.verbosity);

    match supervisor::run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "fatal error");
            std::process::ExitCode::FAILURE
        }
    }
}
