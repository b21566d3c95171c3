use std::sync::Arc;

use anyhow::{Error, Result};
use notification_dispatcher::{
    api::run_api_server,
    clients::{database::DatabaseClient, rbmq::RabbitMqClient},
    config::{Config, LogFormat},
    consumer::DeliveryLoop,
    models::delivery::RetryPolicy,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing(config.log_format);

    // Any failure before the consumer is running is fatal; a supervisor
    // restarts the process.
    let database = DatabaseClient::connect(&config.database_url).await?;
    database.ensure_schema().await?;

    let rabbitmq = RabbitMqClient::connect(&config).await?;
    let consumer = rabbitmq.create_consumer().await?;

    let delivery_loop = Arc::new(DeliveryLoop::new(
        database,
        rabbitmq,
        RetryPolicy::from_config(&config),
    ));

    info!(port = config.port, "Notification dispatcher running");

    tokio::select! {
        result = delivery_loop.run(consumer) => {
            if let Err(e) = &result {
                error!(error = %e, "Delivery loop stopped");
            }
            result
        }
        result = run_api_server(config.clone()) => {
            if let Err(e) = &result {
                error!(error = %e, "Liveness server stopped");
            }
            result
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting");
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
