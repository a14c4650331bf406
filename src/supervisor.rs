use std::future::Future;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

/// Waits for `signal` or for the first task to exit, whichever comes first,
/// then flips `shutdown` and joins the remaining tasks.
///
/// Every task is expected to run until shutdown, so one that exits early
/// (cleanly or not) is reported as an error and the caller should exit
/// non-zero.
pub async fn supervise<S>(
    mut tasks: JoinSet<anyhow::Result<()>>,
    shutdown: watch::Sender<bool>,
    signal: S,
) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    let mut failure = None;

    tokio::select! {
        _ = signal => info!("shutdown requested"),
        Some(joined) = tasks.join_next() => {
            let err = match flatten(joined) {
                Ok(()) => anyhow::anyhow!("task exited before shutdown"),
                Err(err) => err,
            };
            error!(error = %err, "task stopped unexpectedly, shutting down");
            failure = Some(err);
        }
    }

    shutdown.send_replace(true);
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = flatten(joined) {
            error!(error = %err, "task finished with error");
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn flatten(joined: Result<anyhow::Result<()>, JoinError>) -> anyhow::Result<()> {
    joined.map_err(|err| anyhow::Error::new(err).context("task panicked"))?
}
