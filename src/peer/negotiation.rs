//! Completion sink for create-offer/create-answer and set-description requests

use crate::peer::types::SessionDescription;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug)]
enum Creation {
    Pending,
    Created(SessionDescription),
    Taken,
    Failed(String),
}

/// Per-endpoint observer for the description half of the handshake.
///
/// The engine reports each create request exactly once, either through
/// [`notify_description_created`](Self::notify_description_created) or
/// [`notify_description_create_failed`](Self::notify_description_create_failed).
/// Set-description requests report through the `notify_set_*` pair.
pub struct NegotiationObserver {
    name: String,
    creation: Mutex<Creation>,
    sets_succeeded: AtomicUsize,
    set_failures: Mutex<Vec<String>>,
    progress: Arc<Notify>,
}

impl NegotiationObserver {
    pub fn new(name: impl Into<String>, progress: Arc<Notify>) -> Self {
        Self {
            name: name.into(),
            creation: Mutex::new(Creation::Pending),
            sets_succeeded: AtomicUsize::new(0),
            set_failures: Mutex::new(Vec::new()),
            progress,
        }
    }

    pub fn notify_description_created(&self, description: SessionDescription) {
        info!(endpoint = %self.name, kind = %description.kind(), "SDP creation successful");
        *self.creation.lock() = Creation::Created(description);
        self.progress.notify_waiters();
    }

    pub fn notify_description_create_failed(&self, error: impl Into<String>) {
        let error = error.into();
        warn!(endpoint = %self.name, %error, "SDP creation failed");
        *self.creation.lock() = Creation::Failed(error);
        self.progress.notify_waiters();
    }

    pub fn notify_set_succeeded(&self) {
        debug!(endpoint = %self.name, "SDP set successfully");
        self.sets_succeeded.fetch_add(1, Ordering::AcqRel);
        self.progress.notify_waiters();
    }

    pub fn notify_set_failed(&self, error: impl Into<String>) {
        let error = error.into();
        warn!(endpoint = %self.name, %error, "SDP set failed");
        self.set_failures.lock().push(error);
        self.progress.notify_waiters();
    }

    /// True once a description has been created, whether or not it was taken since
    pub fn is_complete(&self) -> bool {
        matches!(
            *self.creation.lock(),
            Creation::Created(_) | Creation::Taken
        )
    }

    pub fn creation_error(&self) -> Option<String> {
        match &*self.creation.lock() {
            Creation::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Hands the created description to the caller. Only the first call gets it.
    pub fn take_description(&self) -> Option<SessionDescription> {
        let mut creation = self.creation.lock();
        match std::mem::replace(&mut *creation, Creation::Pending) {
            Creation::Created(description) => {
                *creation = Creation::Taken;
                Some(description)
            }
            other => {
                *creation = other;
                None
            }
        }
    }

    pub fn sets_succeeded(&self) -> usize {
        self.sets_succeeded.load(Ordering::Acquire)
    }

    pub fn set_failures(&self) -> Vec<String> {
        self.set_failures.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::SdpKind;

    fn observer() -> NegotiationObserver {
        NegotiationObserver::new("Peer1", Arc::new(Notify::new()))
    }

    #[test]
    fn description_is_taken_exactly_once() {
        let observer = observer();
        assert!(!observer.is_complete());
        assert!(observer.take_description().is_none());

        observer.notify_description_created(SessionDescription::offer("v=0"));
        assert!(observer.is_complete());

        let taken = observer.take_description().unwrap();
        assert_eq!(taken.kind(), SdpKind::Offer);
        assert!(observer.take_description().is_none());
        assert!(observer.is_complete());
    }

    #[test]
    fn create_failure_is_not_completion() {
        let observer = observer();
        observer.notify_description_create_failed("no transceivers");

        assert!(!observer.is_complete());
        assert_eq!(observer.creation_error().as_deref(), Some("no transceivers"));
        assert!(observer.take_description().is_none());
    }

    #[test]
    fn set_results_are_recorded() {
        let observer = observer();
        observer.notify_set_succeeded();
        observer.notify_set_succeeded();
        observer.notify_set_failed("bad sdp");

        assert_eq!(observer.sets_succeeded(), 2);
        assert_eq!(observer.set_failures(), vec!["bad sdp".to_string()]);
    }

    #[tokio::test]
    async fn creation_wakes_waiters() {
        let progress = Arc::new(Notify::new());
        let observer = Arc::new(NegotiationObserver::new("Peer2", progress.clone()));

        let notified = progress.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let producer = observer.clone();
        tokio::spawn(async move {
            producer.notify_description_created(SessionDescription::answer("v=0"));
        });

        tokio::time::timeout(std::time::Duration::from_secs(1), notified)
            .await
            .unwrap();
        assert!(observer.is_complete());
    }
}
