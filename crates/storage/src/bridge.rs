//! Stream lifecycle bridging between storage backends and HTTP bodies.
//!
//! A [`StreamBridge`] wraps a backend [`ByteStream`] in an explicit state
//! machine (`Idle -> Streaming -> {Completed, Cancelled, Errored}`) with a
//! single release point for the underlying resource. The HTTP layer hands the
//! bridge to the response body and keeps a [`BridgeHandle`] for cancellation
//! and observation.
//!
//! Backpressure is pull-driven: the source is only polled when the consumer
//! polls the bridge, so a slow client never forces buffering.

use crate::error::StorageResult;
use crate::traits::ByteStream;
use bytes::Bytes;
use futures::Stream;
use futures::task::AtomicWaker;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::task::{Context, Poll};

/// Lifecycle state of a bridged stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    /// Created but not yet polled.
    Idle,
    /// At least one poll has reached the source.
    Streaming,
    /// Source ran to end-of-stream.
    Completed,
    /// Consumer cancelled (or dropped the stream mid-flight).
    Cancelled,
    /// Source reported a terminal error.
    Errored,
}

impl BridgeState {
    /// Check if the stream reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Errored)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Streaming,
            2 => Self::Completed,
            3 => Self::Cancelled,
            _ => Self::Errored,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Streaming => 1,
            Self::Completed => 2,
            Self::Cancelled => 3,
            Self::Errored => 4,
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    cancelled: AtomicBool,
    waker: AtomicWaker,
}

/// Clonable handle for cancelling and observing a [`StreamBridge`].
#[derive(Clone, Debug)]
pub struct BridgeHandle {
    shared: Arc<Shared>,
}

impl BridgeHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Request cancellation. The bridge releases its source on the next poll
    /// (or immediately when the consumer drops it) and yields no further
    /// items. Safe to call multiple times.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.shared.waker.wake();
    }
}

/// A cancellable, backpressure-respecting byte stream over a storage source.
///
/// Only one logical consumer may read a bridge; the inner source is acquired
/// at construction and dropped exactly once, at the first terminal
/// transition. Dropping the bridge before completion counts as cancellation,
/// so client disconnects release file handles without any delayed cleanup.
pub struct StreamBridge {
    inner: Option<ByteStream>,
    shared: Arc<Shared>,
}

impl StreamBridge {
    /// Wrap a backend stream. The bridge starts in [`BridgeState::Idle`].
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner: Some(inner),
            shared: Arc::new(Shared {
                state: AtomicU8::new(BridgeState::Idle.as_u8()),
                cancelled: AtomicBool::new(false),
                waker: AtomicWaker::new(),
            }),
        }
    }

    /// Get a handle for cancellation and state observation.
    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            shared: self.shared.clone(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// The single release point: drops the source and records the terminal
    /// state. Every terminal transition and `Drop` funnels through here.
    fn release(&mut self, terminal: BridgeState) {
        debug_assert!(terminal.is_terminal());
        self.inner = None;
        self.shared
            .state
            .store(terminal.as_u8(), Ordering::Release);
    }
}

impl Stream for StreamBridge {
    type Item = StorageResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.shared.cancelled.load(Ordering::Acquire) {
            if !this.state().is_terminal() {
                this.release(BridgeState::Cancelled);
            }
            return Poll::Ready(None);
        }

        if this.inner.is_none() {
            return Poll::Ready(None);
        }

        if this.state() == BridgeState::Idle {
            this.shared
                .state
                .store(BridgeState::Streaming.as_u8(), Ordering::Release);
        }

        // Register for cancel wakeups before polling the source, so a cancel
        // racing with a pending read still wakes the consumer.
        this.shared.waker.register(cx.waker());

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.release(BridgeState::Completed);
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.release(BridgeState::Errored);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
        }
    }
}

impl Drop for StreamBridge {
    fn drop(&mut self) {
        // Consumer went away mid-stream (e.g. client disconnect).
        if self.inner.is_some() && !self.state().is_terminal() {
            self.release(BridgeState::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use futures::StreamExt;

    /// Sets a flag when dropped, so tests can observe source release.
    struct DropProbe(Arc<AtomicBool>);

    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.0.store(true, Ordering::Release);
        }
    }

    fn probed_stream(
        chunks: Vec<StorageResult<Bytes>>,
    ) -> (ByteStream, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        let probe = DropProbe(dropped.clone());
        let stream = async_stream::stream! {
            let _probe = probe;
            for chunk in chunks {
                yield chunk;
            }
        };
        (Box::pin(stream), dropped)
    }

    #[tokio::test]
    async fn runs_to_completion() {
        let (source, dropped) = probed_stream(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);
        let mut bridge = StreamBridge::new(source);
        assert_eq!(bridge.state(), BridgeState::Idle);

        let mut collected = Vec::new();
        while let Some(chunk) = bridge.next().await {
            assert_eq!(bridge.state(), BridgeState::Streaming);
            collected.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(collected, b"hello world");
        assert_eq!(bridge.state(), BridgeState::Completed);
        assert!(dropped.load(Ordering::Acquire), "source should be released");
    }

    #[tokio::test]
    async fn error_is_forwarded_then_terminal() {
        let (source, dropped) = probed_stream(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(StorageError::InvalidKey("boom".to_string())),
            Ok(Bytes::from_static(b"unreachable")),
        ]);
        let mut bridge = StreamBridge::new(source);

        assert!(bridge.next().await.unwrap().is_ok());
        assert!(bridge.next().await.unwrap().is_err());
        assert_eq!(bridge.state(), BridgeState::Errored);
        assert!(dropped.load(Ordering::Acquire));

        // No further items after the terminal error.
        assert!(bridge.next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_releases_source_and_ends_stream() {
        let (source, dropped) = probed_stream(vec![
            Ok(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
            Ok(Bytes::from_static(b"c")),
        ]);
        let mut bridge = StreamBridge::new(source);
        let handle = bridge.handle();

        assert!(bridge.next().await.unwrap().is_ok());
        handle.cancel();

        assert!(bridge.next().await.is_none());
        assert_eq!(handle.state(), BridgeState::Cancelled);
        assert!(dropped.load(Ordering::Acquire), "cancel must release the source");
    }

    #[tokio::test]
    async fn drop_mid_stream_counts_as_cancellation() {
        let (source, dropped) = probed_stream(vec![Ok(Bytes::from_static(b"a"))]);
        let mut bridge = StreamBridge::new(source);
        let handle = bridge.handle();

        assert!(bridge.next().await.unwrap().is_ok());
        drop(bridge);

        assert_eq!(handle.state(), BridgeState::Cancelled);
        assert!(dropped.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn repeated_cancel_cycles_do_not_leak() {
        for _ in 0..1000 {
            let (source, dropped) = probed_stream(vec![
                Ok(Bytes::from_static(b"x")),
                Ok(Bytes::from_static(b"y")),
            ]);
            let mut bridge = StreamBridge::new(source);
            let handle = bridge.handle();

            assert!(bridge.next().await.unwrap().is_ok());
            handle.cancel();
            assert!(bridge.next().await.is_none());
            assert!(dropped.load(Ordering::Acquire));
        }
    }
}
