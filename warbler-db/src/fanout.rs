use crate::error::{Result, TimelineError};
use crate::store::{StoreError, StoreResult};
use futures::{StreamExt, stream};
use std::num::NonZeroUsize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use warbler_common::model::user::UserId;

pub const DEFAULT_FAN_OUT_CONCURRENCY: NonZeroUsize = NonZeroUsize::new(32).unwrap();

/// Runs one independent point write per follower, at most `concurrency` at a
/// time and in no particular order.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct FanOut {
    concurrency: NonZeroUsize,
}

/// What happened to every follower of one fan-out.
#[derive(Debug, Default)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failed: Vec<(UserId, StoreError)>,
    /// Followers whose write was never issued because of cancellation.
    pub skipped: Vec<UserId>,
}

enum Delivery {
    Delivered,
    Failed(StoreError),
    Skipped,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(DEFAULT_FAN_OUT_CONCURRENCY)
    }
}

impl FanOut {
    #[must_use]
    pub fn new(concurrency: NonZeroUsize) -> Self {
        Self { concurrency }
    }

    #[must_use]
    pub fn concurrency(self) -> NonZeroUsize {
        self.concurrency
    }

    pub async fn run<F, Fut>(
        self,
        followers: Vec<UserId>,
        cancel: &CancellationToken,
        write: F,
    ) -> FanOutReport
    where
        F: Fn(UserId) -> Fut + Sync,
        Fut: Future<Output = StoreResult<()>> + Send,
    {
        let write = &write;
        let deliveries: Vec<(UserId, Delivery)> = stream::iter(followers)
            .map(|follower| async move {
                if cancel.is_cancelled() {
                    return (follower, Delivery::Skipped);
                }

                match write(follower).await {
                    Ok(()) => (follower, Delivery::Delivered),
                    Err(err) => (follower, Delivery::Failed(err)),
                }
            })
            .buffer_unordered(self.concurrency.get())
            .collect()
            .await;

        let mut report = FanOutReport::default();
        for (follower, delivery) in deliveries {
            match delivery {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Failed(err) => {
                    warn!(%follower, error = %err, "Fan-out write failed");
                    report.failed.push((follower, err));
                }
                Delivery::Skipped => report.skipped.push(follower),
            }
        }

        debug!(
            delivered = report.delivered,
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Fan-out finished"
        );
        report
    }
}

impl FanOutReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.delivered + self.failed.len() + self.skipped.len()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    #[must_use]
    pub fn failed_followers(&self) -> Vec<UserId> {
        self.failed.iter().map(|(follower, _)| *follower).collect()
    }

    /// A report with any failed follower is an error. Skipped followers are
    /// left for the caller to report.
    pub fn into_result(self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(TimelineError::PartialFanOut(self))
        }
    }
}
