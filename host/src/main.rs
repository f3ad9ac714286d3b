/// Streamgrab Native Messaging Host - Main Entry Point
///
/// Launched by the browser extension once per message. Reads a single
/// length-prefixed JSON request from stdin, answers on stdout, and for
/// downloads stays alive supervising FFmpeg until it exits.
mod commands;
mod config;
mod logging;
mod process;
mod workers;

use std::process::ExitCode;
use tracing::info;

use commands::HostState;
use config::HostConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env file
    dotenvy::dotenv().ok();

    let config = HostConfig::from_env();

    // Diagnostics go to the log file; stdout is reserved for frames
    logging::init(&config.log_dir);

    info!("=== Streamgrab host starting (pid {}) ===", std::process::id());
    config.log_summary();

    let state = HostState::new(config);
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    let exit = commands::handle_invocation(&state, &mut stdin, &mut stdout).await;

    info!("Host exiting: {:?}", exit);
    exit.into()
}
