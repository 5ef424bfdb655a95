use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::{Listener, Subscription, TerminalEvent};

type CancelFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Pull-based view over a push-style subscription.
///
/// Events queue without bound while nobody polls. Once `cancel` fires the
/// stream ends (queued events are not yielded) and the subscription is
/// released, even if no consumer is currently polling.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<TerminalEvent>,
    subscription: Subscription,
    cancelled: CancelFuture,
    // Stops the cancellation watcher when the stream goes away first.
    dropped: CancellationToken,
    finished: bool,
}

impl EventStream {
    pub fn new<F>(subscribe: F, cancel: CancellationToken) -> Self
    where
        F: FnOnce(Listener) -> Subscription,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: Listener = Arc::new(move |event: &TerminalEvent| {
            // Receiver gone means the stream finished; nothing to deliver to.
            let _ = tx.send(event.clone());
        });
        let subscription = subscribe(listener);

        let dropped = CancellationToken::new();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let watched = cancel.clone();
            let stop = dropped.clone();
            let sub = subscription.clone();
            handle.spawn(async move {
                tokio::select! {
                    _ = watched.cancelled() => sub.unsubscribe(),
                    _ = stop.cancelled() => {}
                }
            });
        }

        Self {
            rx,
            subscription,
            cancelled: Box::pin(cancel.cancelled_owned()),
            dropped,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.subscription.unsubscribe();
        self.rx.close();
    }
}

impl Stream for EventStream {
    type Item = TerminalEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        // Cancellation wins over anything still queued.
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.finish();
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(event)),
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.dropped.cancel();
        self.subscription.unsubscribe();
    }
}

/// Adapts `subscribe` into an [`EventStream`] that ends when `cancel` fires.
pub fn event_stream<F>(subscribe: F, cancel: CancellationToken) -> EventStream
where
    F: FnOnce(Listener) -> Subscription,
{
    EventStream::new(subscribe, cancel)
}
