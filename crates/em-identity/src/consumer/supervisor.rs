use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{BatchConsumer, BatchHandler, ConsumerError};

/// Run a consumer until cancelled, restarting it after `restart_delay`
/// whenever its loop fails.
pub async fn run_supervised<H: BatchHandler>(
    consumer: BatchConsumer<H>,
    cancel: CancellationToken,
    restart_delay: Duration,
) {
    let name = consumer.name();
    info!(consumer = name, "Consumer started");

    loop {
        match consumer.run(&cancel).await {
            Ok(()) | Err(ConsumerError::Cancelled) => break,
            Err(e) => {
                metrics::counter!("identity.consumer.restarts_total", "consumer" => name)
                    .increment(1);
                error!(
                    consumer = name,
                    error = %e,
                    delay_ms = restart_delay.as_millis() as u64,
                    "Consumer loop failed, restarting"
                );

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(restart_delay) => {}
                }
            }
        }
    }

    info!(consumer = name, "Consumer stopped");
}
