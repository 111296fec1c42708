//! Rate control for solution streams.
//!
//! Subscribers that repaint a UI or feed a rate-limited API rarely want the
//! receiver's full navigation rate. [`PaceExt::pace`] bounds any stream to a
//! maximum cadence with latest-wins semantics: when several solutions land
//! inside one interval, only the freshest survives. Older items are stale
//! positions by definition, so dropping them is correct here in a way it
//! would not be for a general-purpose queue.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Extension trait bounding a stream's emission rate.
pub trait PaceExt: Stream {
    /// Emit at most once per `period`, keeping only the latest item.
    fn pace(self, period: Duration) -> Pace<Self>
    where
        Self: Sized,
    {
        Pace::new(self, period)
    }
}

impl<S: Stream> PaceExt for S {}

pin_project! {
    /// Stream combinator produced by [`PaceExt::pace`].
    pub struct Pace<S: Stream> {
        #[pin]
        inner: S,
        ticker: Interval,
        latest: Option<S::Item>,
    }
}

impl<S: Stream> Pace<S> {
    fn new(inner: S, period: Duration) -> Self {
        let mut ticker = interval(period);
        // A delayed consumer must not be repaid with a burst of stale fixes.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { inner, ticker, latest: None }
    }
}

impl<S: Stream> Stream for Pace<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        ready!(this.ticker.poll_tick(cx));

        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.latest = Some(item),
                Poll::Ready(None) => return Poll::Ready(this.latest.take()),
                Poll::Pending => {
                    // A quiet interval is not the end of the stream; hold the
                    // tick and wait for the source to produce again.
                    return match this.latest.take() {
                        Some(item) => Poll::Ready(Some(item)),
                        None => Poll::Pending,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn keeps_only_the_latest_item_per_interval() {
        let source = futures::stream::iter(0..10);
        let mut paced = source.pace(Duration::from_millis(100));

        // First tick completes immediately; the whole source is ready, so
        // latest-wins drains it to the final element.
        assert_eq!(paced.next().await, Some(9));
        assert_eq!(paced.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn live_stream_is_paced_not_dropped_entirely() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let source = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
        let mut paced = source.pace(Duration::from_millis(100));

        tx.send(1).unwrap();
        assert_eq!(paced.next().await, Some(1));

        tx.send(2).unwrap();
        tx.send(3).unwrap();
        assert_eq!(paced.next().await, Some(3));
    }
}
