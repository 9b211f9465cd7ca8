//! Test Mender binary entry point.
//!
//! Runs the repair loop until Ctrl-C. All logs go to stderr.
//!
//! Coverage is excluded because the main function needs a live model
//! endpoint and a signal to exit.

// Enable the coverage attribute when running with nightly for llvm-cov exclusions
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use test_mender::config::Config;
use test_mender::runtime::Runtime;
use tracing_subscriber::EnvFilter;

#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let filter = std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .parse()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }

    tracing::info!("test-mender starting...");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        database = %config.database_path,
        model = %config.model,
        endpoint = %config.model_base_url,
        "Configuration loaded"
    );

    let runtime = match Runtime::from_config(&config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Startup error: {e}");
            std::process::exit(1);
        }
    };

    runtime
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {e}");
            }
        })
        .await;

    tracing::info!("test-mender shutdown complete");
}
