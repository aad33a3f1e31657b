use std::future::Future;
use std::pin::pin;
use std::time::{Duration, Instant};

use tracing::{Level, warn};

/// Awaits `future`, warning once it has been pending for `threshold` and again
/// when it finally resolves. The output is returned unchanged.
///
/// `describe` only runs when the warning is actually emitted.
pub async fn warn_if_slow<F, M>(describe: &M, threshold: Duration, future: F) -> F::Output
where
    F: Future,
    M: Fn() -> String,
{
    if !tracing::enabled!(Level::WARN) {
        return future.await;
    }

    let started = Instant::now();
    let mut future = pin!(future);
    match tokio::time::timeout(threshold, &mut future).await {
        Ok(output) => output,
        Err(_) => {
            let what = describe();
            warn!(
                waited_secs = threshold.as_secs_f32(),
                "Still waiting on {what}"
            );
            let output = future.await;
            warn!(
                elapsed_secs = started.elapsed().as_secs_f32(),
                "Finished {what}"
            );
            output
        }
    }
}
