//! Cancellation utilities
//!
//! A generation observes one [`CancelHandle`]. Functions see it through their
//! context and may stop the whole generation with it.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::types::ChatStream;

/// A handle that can be used to request cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: std::sync::Arc<std::sync::Mutex<Option<String>>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Request cancellation, recording why. The first reason wins.
    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.reason.lock() {
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.token.cancel();
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|r| r.clone())
    }

    /// Future that resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// A child handle: cancelled with its parent, but cancelling it does not
    /// touch the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            reason: self.reason.clone(),
        }
    }
}

/// Make a ChatStream stop yielding once `handle` is cancelled.
pub fn make_cancellable_stream(stream: ChatStream, handle: &CancelHandle) -> ChatStream {
    let token = handle.token.clone();
    let mut inner = stream;
    let s = async_stream::stream! {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                item = inner.next() => match item {
                    Some(item) => yield item,
                    None => break,
                },
            }
        }
    };
    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatStreamEvent;
    use futures::stream;

    #[test]
    fn reason_keeps_first_caller() {
        let handle = CancelHandle::new();
        assert!(!handle.is_cancelled());
        handle.cancel_with_reason("tool asked to stop");
        handle.cancel_with_reason("second");
        assert!(handle.is_cancelled());
        assert_eq!(handle.reason().as_deref(), Some("tool asked to stop"));
    }

    #[tokio::test]
    async fn cancelled_stream_stops() {
        let events = vec![
            Ok(ChatStreamEvent::ContentDelta {
                delta: "a".into(),
                index: None,
            }),
            Ok(ChatStreamEvent::ContentDelta {
                delta: "b".into(),
                index: None,
            }),
        ];
        let handle = CancelHandle::new();
        handle.cancel();
        let mut s = make_cancellable_stream(Box::pin(stream::iter(events)), &handle);
        assert!(s.next().await.is_none());
    }
}
