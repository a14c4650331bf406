use tokio::sync::watch;

pub mod campaign_scheduler;
pub mod dispatch_worker;
pub mod message_dispatcher;

/// Resolves once the flag flips to `true` or its sender is dropped.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}
