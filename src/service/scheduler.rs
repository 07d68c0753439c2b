//! Debounced resync scheduling.
//!
//! Listing containers spawns an engine process, so resync requests are
//! coalesced: callers post a desired delay through a [`PollRequester`]
//! without blocking, and the [`PollScheduler`] loop performs exactly one full
//! resync once no new request arrived for that delay.
//!
//! There is a single request slot. A request posted while another one is
//! still pending is dropped, the pending one already stands for "resync soon".
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Creates a connected requester/scheduler pair.
///
/// `default_delay` replaces zero delays; `interval`, if set, forces a resync
/// at that period regardless of requests.
pub fn channel(default_delay: Duration, interval: Option<Duration>) -> (PollRequester, PollScheduler) {
    let (tx, rx) = mpsc::channel(1);
    (
        PollRequester { tx },
        PollScheduler {
            rx,
            default_delay,
            interval,
        },
    )
}

/// Non-blocking handle for asking the scheduler to resync.
#[derive(Debug, Clone)]
pub struct PollRequester {
    tx: mpsc::Sender<Duration>,
}

impl PollRequester {
    /// Posts a resync request. Returns `false` if it was dropped because a
    /// request is already pending (or the scheduler is gone).
    pub fn request(&self, delay: Duration) -> bool {
        match self.tx.try_send(delay) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::trace!("resync already pending, dropping request");
                false
            }
            Err(TrySendError::Closed(_)) => {
                log::trace!("resync scheduler stopped, dropping request");
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct PollScheduler {
    rx: mpsc::Receiver<Duration>,
    default_delay: Duration,
    interval: Option<Duration>,
}

impl PollScheduler {
    /// Runs until `shutdown` is cancelled, calling `resync` once per quiet period.
    ///
    /// Every received request restarts the debounce timer, so a burst of
    /// requests results in one resync `delay` after the last one.
    pub async fn run<F, Fut>(mut self, shutdown: CancellationToken, mut resync: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        log::debug!(
            "resync scheduler starting (debounce={:?}, interval={:?})",
            self.default_delay,
            self.interval
        );

        let mut periodic = self.interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(timer);
        let mut armed = false;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(delay) = self.rx.recv() => {
                    let delay = if delay.is_zero() { self.default_delay } else { delay };
                    timer.as_mut().reset(Instant::now() + delay);
                    armed = true;
                }

                () = &mut timer, if armed => {
                    armed = false;
                    if !run_until_cancelled(&shutdown, resync()).await {
                        break;
                    }
                }

                () = next_tick(&mut periodic) => {
                    // covers any pending request as well
                    armed = false;
                    if !run_until_cancelled(&shutdown, resync()).await {
                        break;
                    }
                }
            }
        }

        log::debug!("resync scheduler stopped");
    }
}

/// Drives `task` to completion unless `shutdown` fires first, in which case
/// the task is dropped. Returns `false` if it was cancelled.
pub(crate) async fn run_until_cancelled(shutdown: &CancellationToken, task: impl Future<Output = ()>) -> bool {
    tokio::select! {
        biased;

        _ = shutdown.cancelled() => {
            log::debug!("resync interrupted by shutdown");
            false
        }
        () = task => true,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
