//! Runs a benchmark against a MEFS daemon and prints the results.
//!
//! See [`mefs_bench::config`] for the available configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use argh::FromArgs;
use tokio_util::sync::CancellationToken;

use mefs_bench::config::Config;
use mefs_bench::observability::init_tracing;
use mefs_bench::remote::HttpRemote;

/// Concurrent multi-user transfer benchmark for the MEFS storage daemon
#[derive(Debug, FromArgs)]
pub struct Args {
    /// path to the yaml configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.logging);
    tracing::debug!(?config);

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;

    let remote = HttpRemote::new(&config.remote, config.request_timeout)
        .context("failed to create client")?;
    let benchmark = config.benchmark();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, finishing in-flight transfers");
            on_signal.cancel();
        }
    });

    let summary = mefs_bench::run(Arc::new(remote), benchmark, cancel).await;
    summary.print();

    Ok(())
}
