//! Cancellable event streams.
//!
//! A streaming handler returns a [`StreamSubscription`]: the upstream event
//! sequence plus the connection that feeds it. The router wraps it in an
//! [`EventStream`], pairing it with a cancellation token so that
//! cancelling consumption also tears the connection down.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::errors::MarketDataError;
use crate::models::Payload;

/// The upstream connection behind a stream.
#[async_trait]
pub trait StreamConnection: Send + Sync {
    async fn close(&self) -> Result<(), MarketDataError>;
}

/// What a streaming handler hands back to the router.
pub struct StreamSubscription {
    pub events: BoxStream<'static, Result<Payload, MarketDataError>>,
    pub connection: Box<dyn StreamConnection>,
}

impl StreamSubscription {
    pub fn new<S, C>(events: S, connection: C) -> Self
    where
        S: Stream<Item = Result<Payload, MarketDataError>> + Send + 'static,
        C: StreamConnection + 'static,
    {
        Self {
            events: events.boxed(),
            connection: Box::new(connection),
        }
    }
}

/// Cancellable, lazily produced payload sequence.
///
/// The connection is closed exactly once: by [`cancel`](Self::cancel), or
/// on drop when the stream was never cancelled explicitly.
pub struct EventStream {
    label: String,
    events: Option<BoxStream<'static, Result<Payload, MarketDataError>>>,
    connection: Option<Box<dyn StreamConnection>>,
    token: CancellationToken,
}

impl EventStream {
    pub fn new(
        label: impl Into<String>,
        subscription: StreamSubscription,
        token: CancellationToken,
    ) -> Self {
        Self {
            label: label.into(),
            events: Some(subscription.events),
            connection: Some(subscription.connection),
            token,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token shared with the streaming handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop consumption and close the upstream connection.
    ///
    /// Returns once the connection's close has completed. Calling it again
    /// is a no-op.
    pub async fn cancel(&mut self) -> Result<(), MarketDataError> {
        self.token.cancel();
        self.events.take();
        match self.connection.take() {
            Some(connection) => {
                debug!("Closing stream connection for {}", self.label);
                connection.close().await
            }
            None => Ok(()),
        }
    }
}

impl Stream for EventStream {
    type Item = Result<Payload, MarketDataError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            this.events.take();
            return Poll::Ready(None);
        }
        match this.events.as_mut() {
            Some(events) => events.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.token.cancel();
        let Some(connection) = self.connection.take() else {
            return;
        };
        let label = std::mem::take(&mut self.label);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = connection.close().await {
                        warn!("Failed to close stream connection for {}: {}", label, e);
                    }
                });
            }
            Err(_) => warn!("No runtime to close stream connection for {}", label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingConnection {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StreamConnection for CountingConnection {
        async fn close(&self) -> Result<(), MarketDataError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stream(closes: Arc<AtomicUsize>) -> EventStream {
        let events = futures::stream::iter((0..100).map(|i| Ok(json!({ "seq": i }))));
        EventStream::new(
            "test",
            StreamSubscription::new(events, CountingConnection { closes }),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_cancel_closes_once_and_ends_stream() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut events = stream(closes.clone());

        assert_eq!(events.next().await.unwrap().unwrap(), json!({ "seq": 0 }));
        events.cancel().await.unwrap();
        events.cancel().await.unwrap();
        assert!(events.next().await.is_none());
        drop(events);

        tokio::task::yield_now().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_schedules_close() {
        let closes = Arc::new(AtomicUsize::new(0));
        let events = stream(closes.clone());
        let token = events.cancellation_token();
        drop(events);

        assert!(token.is_cancelled());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_cancellation_ends_stream() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut events = stream(closes);
        events.cancellation_token().cancel();
        assert!(events.next().await.is_none());
    }
}
