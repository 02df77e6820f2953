//! koca - launcher entry point
//!
//! Every argument is handed to the resolved koca binary untouched.

use koca_launcher::config::ConfigManager;
use koca_launcher::error::{LauncherError, LauncherResult, EXIT_FAILURE};
use koca_launcher::launcher::{report_error, Launcher, StdioPolicy};
use koca_launcher::release::ReleaseCoordinate;
use koca_launcher::ui::UiContext;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive
const ENV_LOG: &str = "KOCA_LAUNCHER_LOG";

fn main() -> ExitCode {
    init_logging();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            report_error(&LauncherError::io("starting async runtime", e));
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let code = runtime.block_on(run());
    // An interrupted resolve may still be stuck in a read; don't wait for it
    runtime.shutdown_background();
    ExitCode::from(code)
}

async fn run() -> u8 {
    match setup().await {
        Ok((launcher, coord)) => {
            let args = std::env::args_os().skip(1);
            launcher.run(&coord, args, StdioPolicy::Inherit).await
        }
        Err(e) => {
            report_error(&e);
            e.exit_code()
        }
    }
}

fn init_logging() {
    // Logs go to stderr; stdout belongs to the child
    let filter = EnvFilter::try_from_env(ENV_LOG)
        .unwrap_or_else(|_| EnvFilter::new("koca_launcher=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

async fn setup() -> LauncherResult<(Launcher, ReleaseCoordinate)> {
    let manager = ConfigManager::new();
    debug!("Loading config from {}", manager.path().display());
    let config = manager.load().await?;

    let coord = ReleaseCoordinate::for_host(&config.release.name, env!("CARGO_PKG_VERSION"))?;
    debug!("Resolved coordinate {}", coord);

    let launcher = Launcher::from_config(&config, UiContext::detect());
    Ok((launcher, coord))
}
