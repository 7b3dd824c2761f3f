//! Process bootstrap: load `Config` from the environment, set up
//! `tracing`, run the operator, map fatal startup failure to a non-zero
//! exit code (`spec.md` §6 "Exit codes").

use kafka_operator::config::Config;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = kafka_operator::run(config).await {
        tracing::error!(error = %err, "operator exited with a fatal error");
        std::process::exit(1);
    }
}
