use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use crate::application::{
    handlers::{
        message_dispatcher::{Disposition, MessageDispatchHandler},
        stop_requested,
    },
    services::event_bus::{Delivery, DeliveryStream},
};

/// Pulls deliveries one at a time and settles each according to the
/// dispatcher's decision.
pub struct DispatchWorker {
    handler: Arc<MessageDispatchHandler>,
    shutdown_grace: Duration,
}

impl DispatchWorker {
    pub fn new(handler: Arc<MessageDispatchHandler>) -> Self {
        Self {
            handler,
            shutdown_grace: Duration::from_secs(10),
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Runs until `shutdown` flips to `true` or the delivery stream ends.
    /// A delivery in flight at shutdown gets `shutdown_grace` to finish. If it
    /// is still running after that it is dropped unsettled and comes back once
    /// the broker's ack wait expires.
    pub async fn run(
        &self,
        mut deliveries: DeliveryStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!("dispatch worker started, waiting for messages");

        loop {
            tokio::select! {
                biased;

                _ = stop_requested(&mut shutdown) => {
                    info!("dispatch worker shutting down");
                    return Ok(());
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        let process = self.process(delivery.as_ref());
                        tokio::pin!(process);

                        tokio::select! {
                            biased;

                            _ = &mut process => {}
                            _ = stop_requested(&mut shutdown) => {
                                info!(
                                    grace_ms = self.shutdown_grace.as_millis() as u64,
                                    "shutdown while processing, waiting for in-flight delivery"
                                );
                                if tokio::time::timeout(self.shutdown_grace, process).await.is_err() {
                                    warn!("in-flight delivery did not finish, leaving it unacknowledged");
                                }
                                return Ok(());
                            }
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "failed to receive delivery");
                    }
                    None => anyhow::bail!("dispatch stream closed"),
                },
            }
        }
    }

    async fn process(&self, delivery: &dyn Delivery) {
        let disposition = self.handler.handle(delivery.payload()).await;
        let settled = match disposition {
            Disposition::Ack => delivery.ack().await,
            Disposition::Requeue => delivery.nack_requeue().await,
            Disposition::Reject => delivery.reject().await,
        };
        if let Err(err) = settled {
            error!(?disposition, error = %err, "failed to settle delivery");
        }
    }
}
