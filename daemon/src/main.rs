use log::{error, info};
use tokio_util::sync::CancellationToken;

use dlt_relay_daemon::config::{parse_args, parse_config};
use dlt_relay_daemon::error::DltRelayError;
use dlt_relay_daemon::service::DltService;

#[tokio::main]
async fn main() -> Result<(), DltRelayError> {
    env_logger::init();

    let args = parse_args();
    let config = parse_config(&args.config_path).await?;
    info!("config file [{}] parse ok", args.config_path);

    let service = DltService::new(config).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {e}");
        }
        info!("shutting down...");
        signal_token.cancel();
    });

    service.run(shutdown).await
}
