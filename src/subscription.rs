//! Push subscription lifecycle
//!
//! A [`Subscription`] represents one active event subscription or property
//! observation. It owns the cancellation token wired into the transport and
//! the transport-level handle. Delivery stops the moment the token is
//! cancelled, whether by [`Subscription::stop`] or by a transport failure;
//! stopping an already stopped subscription is a benign no-op.

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::protocol::ProtocolSubscription;
use crate::thing::Form;

pub struct Subscription {
    name: String,
    form: Form,
    cancel: CancellationToken,
    handle: Mutex<Option<Box<dyn ProtocolSubscription>>>,
}

impl Subscription {
    pub(crate) fn new(
        name: impl Into<String>,
        form: Form,
        cancel: CancellationToken,
        handle: Box<dyn ProtocolSubscription>,
    ) -> Self {
        Self {
            name: name.into(),
            form,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// The affordance name this subscription is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The form the subscription was opened through.
    pub fn form(&self) -> &Form {
        &self.form
    }

    /// Whether messages are still being delivered.
    pub fn active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stops delivery and tears down the transport handle.
    ///
    /// Cancellation is triggered first so any in-flight wait unblocks.
    /// Idempotent: the handle is closed at most once, later calls return
    /// immediately.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.handle.lock().await.take();
        if let Some(mut handle) = handle {
            if let Err(error) = handle.close().await {
                warn!(name = %self.name, %error, "closing the transport subscription failed");
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("active", &self.active())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::error::Error;

    struct CountingHandle {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProtocolSubscription for CountingHandle {
        async fn close(&mut self) -> Result<(), Error> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst) > 0
        }
    }

    fn subscription_with(closed: &Arc<AtomicUsize>) -> Subscription {
        Subscription::new(
            "alarm",
            Form::default(),
            CancellationToken::new(),
            Box::new(CountingHandle {
                closed: Arc::clone(closed),
            }),
        )
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let closed = Arc::new(AtomicUsize::new(0));
        let subscription = subscription_with(&closed);

        assert!(subscription.active());
        assert!(!subscription.cancel_token().is_cancelled());

        subscription.stop().await;
        assert!(!subscription.active());
        assert!(subscription.cancel_token().is_cancelled());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        // The second call must not close the handle again.
        subscription.stop().await;
        assert!(!subscription.active());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_cancellation_deactivates() {
        let closed = Arc::new(AtomicUsize::new(0));
        let subscription = subscription_with(&closed);

        // A transport failure cancels the token without going through stop.
        subscription.cancel_token().cancel();
        assert!(!subscription.active());
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        // A later stop still tears the handle down, exactly once.
        subscription.stop().await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
