//! Thin binary entry point. All the real logic lives in the `tunnel_server`
//! library crate (`src/lib.rs`) so it can be driven from integration tests
//! without going through a process.

use tunnel_server::Config;

#[tokio::main]
async fn main() {
    // Default log level is `info` for this crate; override with `RUST_LOG`.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tunnel_server={}", config.log_level).into()),
        )
        .init();

    if let Err(err) = tunnel_server::run(config).await {
        tracing::error!(error = %err, "fatal bind/serve failure");
        std::process::exit(2);
    }
}
