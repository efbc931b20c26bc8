// src/pipeline/ticker.rs

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run `tick` every `period` until `cancel` fires.
///
/// The first tick happens immediately. A slow tick delays the following ones
/// instead of bursting to catch up. Cancellation is also observed while a tick
/// is in flight, so a tick blocked on a full queue does not hold up shutdown.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(stage = name, ?period, "periodic stage started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tick() => {}
                }
            }
        }
    }
    debug!(stage = name, "periodic stage stopped");
}
