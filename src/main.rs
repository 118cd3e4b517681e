use std::process::ExitCode;

use sluice::logging::{LoggingConfig, init_logging};
use sluice::middleware::{AccessLog, ErrorTranslation};
use sluice::{App, Config, Error, Method, Server, health, shutdown};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(&LoggingConfig::from_env());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("sluice exited with error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Error> {
    let config = Config::from_env()?;
    info!(addr = %config.addr, version = %config.api_version, "starting");

    let (handle, events) = shutdown::channel();
    let app = App::new(handle)
        .layer(AccessLog::new())
        .layer(ErrorTranslation::new())
        .try_handle(Method::Get, &config.api_version, "/liveness", health::liveness)?
        .try_handle(Method::Get, &config.api_version, "/readiness", health::readiness)?;

    Server::bind(config.addr)
        .await?
        .drain_timeout(config.shutdown_timeout)
        .serve(app, events)
        .await
}
