//! Periodic counter reporting

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::counter::OutcomeCounter;

/// Default reporting cadence
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(6);

/// Log a counter snapshot every `every` until `shutdown` is cancelled.
///
/// Only reads the counters. The first report is emitted immediately.
pub async fn run_reporter(
    counter: Arc<OutcomeCounter>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("reporter stopping");
                break;
            }
            _ = ticker.tick() => {
                let snapshot = counter.snapshot();
                info!(valid = snapshot.valid, invalid = snapshot.invalid, "{}", snapshot);
            }
        }
    }
}
