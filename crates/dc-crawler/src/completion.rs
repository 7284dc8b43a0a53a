//! Settle-once completion signals.
//!
//! A [`Completion`] is the outcome of one asynchronous unit of work: a file
//! being consumed, an archive being expanded, a directory being walked. It is
//! created together with a [`Settler`] by [`pair`]; whichever party owns the
//! settler decides the outcome, the other awaits it. This works the same
//! whether the source of the outcome is a callback (a stream hitting end of
//! data inside `poll_read`) or another future.
//!
//! [`join_all`] folds many completions into one and is used for both
//! directory children and gate submissions.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::CrawlError;

/// Result carried by every completion.
pub type Outcome = Result<(), CrawlError>;

/// Creates a connected settler/completion pair.
///
/// # Examples
///
/// ```
/// use dc_crawler::completion;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (settler, done) = completion::pair();
/// settler.resolve();
/// assert!(done.await.is_ok());
/// # }
/// ```
#[must_use]
pub fn pair() -> (Settler, Completion) {
    let (tx, rx) = oneshot::channel();
    (
        Settler { tx },
        Completion {
            state: State::Waiting(rx),
        },
    )
}

/// The settling side of a completion.
///
/// Consumed by settling, so a completion can only ever settle once. Dropping a
/// settler without settling leaves its completion pending forever.
#[derive(Debug)]
pub struct Settler {
    tx: oneshot::Sender<Outcome>,
}

impl Settler {
    /// Settles the completion with the given outcome.
    pub fn settle(self, outcome: Outcome) {
        // The awaiting side may already be gone (its parent rejected first).
        let _ = self.tx.send(outcome);
    }

    /// Settles the completion successfully.
    #[inline]
    pub fn resolve(self) {
        self.settle(Ok(()));
    }

    /// Settles the completion with a failure.
    #[inline]
    pub fn reject(self, error: CrawlError) {
        self.settle(Err(error));
    }

    #[cfg(test)]
    fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The awaiting side of a completion.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion {
    state: State,
}

#[derive(Debug)]
enum State {
    Settled(Option<Outcome>),
    Waiting(oneshot::Receiver<Outcome>),
    Unsettled,
}

impl Completion {
    /// Returns a completion that has already resolved.
    pub fn resolved() -> Self {
        Self {
            state: State::Settled(Some(Ok(()))),
        }
    }

    /// Returns a completion that has already been rejected.
    pub fn rejected(error: CrawlError) -> Self {
        Self {
            state: State::Settled(Some(Err(error))),
        }
    }
}

impl Future for Completion {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            // Polled again after yielding its outcome.
            State::Settled(outcome) => outcome.take().map_or(Poll::Pending, Poll::Ready),
            State::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => {
                    self.state = State::Settled(None);
                    Poll::Ready(outcome)
                }
                Poll::Ready(Err(_)) => {
                    // Settler dropped without an outcome: never settles.
                    self.state = State::Unsettled;
                    Poll::Pending
                }
                Poll::Pending => Poll::Pending,
            },
            State::Unsettled => Poll::Pending,
        }
    }
}

/// Joins child futures into one completion.
///
/// The returned completion rejects with the first child failure and otherwise
/// resolves once every child has resolved. The children are driven on a
/// spawned task that keeps running after a rejection, so siblings are never
/// cancelled; their later failures are logged and discarded.
///
/// Must be called from within a tokio runtime.
pub fn join_all<I, F>(children: I) -> Completion
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Outcome> + Send + 'static,
{
    let mut pending: FuturesUnordered<F> = children.into_iter().collect();
    if pending.is_empty() {
        return Completion::resolved();
    }

    let (settler, completion) = pair();
    tokio::spawn(async move {
        let mut settler = Some(settler);
        while let Some(outcome) = pending.next().await {
            if let Err(error) = outcome {
                match settler.take() {
                    Some(settler) => settler.reject(error),
                    None => debug!(error = %error, "Discarding failure after join already rejected"),
                }
            }
        }
        if let Some(settler) = settler {
            settler.resolve();
        }
    });
    completion
}
