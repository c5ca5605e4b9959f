//! `sibyl-host`: the sidecar process.
//!
//! Reads line-delimited JSON commands on stdin and writes replies on
//! stdout. All diagnostics go to stderr so stdout stays a clean protocol
//! channel for the supervising application.

use anyhow::Result;
use sibyl::backend::mistral::MistralBackend;
use sibyl::backend::InferenceBackend;
use sibyl::bridge::run_loop;
use sibyl::protocol::Reply;
use sibyl::{Dispatcher, SidecarConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = SidecarConfig::load_or_default();
    let backend = MistralBackend::new();

    // Startup precondition: a host that cannot run inference at all reports
    // once on stdout and exits non-zero instead of entering the read loop.
    if let Err(e) = backend.probe() {
        let reply = Reply::error(None, format!("Inference backend unavailable: {e}"));
        println!("{}", serde_json::to_string(&reply)?);
        std::process::exit(1);
    }

    tracing::info!("sidecar ready, entering read loop");
    let mut dispatcher = Dispatcher::new(backend, config);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = std::io::stdout();
    run_loop(&mut dispatcher, stdin, stdout.lock()).await?;
    tracing::info!("read loop ended, exiting");
    Ok(())
}
