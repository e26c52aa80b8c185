// Table of authorization attempts waiting for the provider to redirect back.
//
// Each entry has two producers: the inbound callback and its own timer. Both
// resolve by removing the entry from the table under the lock, so exactly one
// of them gets to send on the entry's channel and the other finds nothing.
use crate::metrics_defs::{
    OAUTH_CALLBACK_MATCHED, OAUTH_CALLBACK_UNMATCHED, OAUTH_PENDING, OAUTH_WAIT_SUPERSEDED,
    OAUTH_WAIT_TIMEOUT,
};
use parking_lot::Mutex;
use shared::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackData {
    pub oauth_token: String,
    pub oauth_verifier: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("authorization was not granted in time")]
    Timeout,
    #[error("a newer authorization attempt replaced this one")]
    Superseded,
}

type WaitResult = Result<CallbackData, WaitError>;

struct PendingAuthorization {
    // Distinguishes re-registrations of the same token, so a stale timer
    // cannot expire a newer attempt.
    generation: u64,
    sender: oneshot::Sender<WaitResult>,
    timer: JoinHandle<()>,
}

struct CorrelatorInner {
    pending: Mutex<HashMap<String, PendingAuthorization>>,
    next_generation: AtomicU64,
    timeout: Duration,
}

#[derive(Clone)]
pub struct OAuthCorrelator {
    inner: Arc<CorrelatorInner>,
}

/// Resolves exactly once, with the callback data or an error.
pub struct AuthorizationWait {
    request_token: String,
    generation: u64,
    receiver: oneshot::Receiver<WaitResult>,
}

impl AuthorizationWait {
    pub async fn wait(self) -> WaitResult {
        // Every entry is resolved before it is dropped, so a closed channel
        // only happens if the runtime is shutting down.
        self.receiver.await.unwrap_or(Err(WaitError::Timeout))
    }
}

impl OAuthCorrelator {
    pub fn new(timeout: Duration) -> Self {
        OAuthCorrelator {
            inner: Arc::new(CorrelatorInner {
                pending: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                timeout,
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Registers `request_token` with the default timeout.
    pub fn begin_wait(&self, request_token: &str) -> AuthorizationWait {
        self.begin_wait_with_timeout(request_token, self.inner.timeout)
    }

    /// Registers `request_token` and starts its timer immediately.
    ///
    /// Must be called from within a tokio runtime. Registering a token that is
    /// already pending resolves the earlier wait with `WaitError::Superseded`.
    pub fn begin_wait_with_timeout(&self, request_token: &str, timeout: Duration) -> AuthorizationWait {
        let (sender, receiver) = oneshot::channel();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);

        let (previous, pending_count) = {
            // The timer is spawned while the lock is held, so it cannot look
            // for the entry before it is inserted.
            let mut pending = self.inner.pending.lock();
            let timer = {
                let correlator = self.clone();
                let token = request_token.to_owned();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    correlator.expire(&token, generation);
                })
            };
            let previous = pending.insert(
                request_token.to_owned(),
                PendingAuthorization {
                    generation,
                    sender,
                    timer,
                },
            );
            (previous, pending.len())
        };

        if let Some(previous) = previous {
            previous.timer.abort();
            let _ = previous.sender.send(Err(WaitError::Superseded));
            counter!(OAUTH_WAIT_SUPERSEDED).increment(1);
            tracing::info!("Authorization attempt superseded by a newer one");
        }
        gauge!(OAUTH_PENDING).set(pending_count as f64);

        AuthorizationWait {
            request_token: request_token.to_owned(),
            generation,
            receiver,
        }
    }

    /// Hands the callback data to the attempt waiting on `request_token`.
    ///
    /// Unknown, expired and already completed tokens are ignored. Returns
    /// whether a pending attempt was resolved.
    pub fn complete(&self, request_token: &str, verifier: &str) -> bool {
        let (entry, pending_count) = {
            let mut pending = self.inner.pending.lock();
            (pending.remove(request_token), pending.len())
        };

        let Some(entry) = entry else {
            counter!(OAUTH_CALLBACK_UNMATCHED).increment(1);
            tracing::debug!("Ignoring callback without a pending authorization");
            return false;
        };

        entry.timer.abort();
        let delivered = entry
            .sender
            .send(Ok(CallbackData {
                oauth_token: request_token.to_owned(),
                oauth_verifier: verifier.to_owned(),
            }))
            .is_ok();
        if !delivered {
            tracing::debug!("Authorization callback arrived after the waiter went away");
        }
        counter!(OAUTH_CALLBACK_MATCHED).increment(1);
        gauge!(OAUTH_PENDING).set(pending_count as f64);
        true
    }

    /// Withdraws `wait` before anyone could have been sent to authorize it.
    /// A later callback for its token is ignored like any unknown one.
    pub(crate) fn cancel(&self, wait: AuthorizationWait) {
        let (entry, pending_count) = self.take_current(&wait.request_token, wait.generation);
        if let Some(entry) = entry {
            entry.timer.abort();
            gauge!(OAUTH_PENDING).set(pending_count as f64);
            tracing::debug!("Withdrew authorization attempt");
        }
    }

    fn expire(&self, request_token: &str, generation: u64) {
        let (entry, pending_count) = self.take_current(request_token, generation);
        if let Some(entry) = entry {
            let _ = entry.sender.send(Err(WaitError::Timeout));
            counter!(OAUTH_WAIT_TIMEOUT).increment(1);
            gauge!(OAUTH_PENDING).set(pending_count as f64);
            tracing::info!("Authorization attempt expired without a callback");
        }
    }

    /// Removes the entry for `request_token` only if it is still the
    /// registration identified by `generation`.
    fn take_current(
        &self,
        request_token: &str,
        generation: u64,
    ) -> (Option<PendingAuthorization>, usize) {
        let mut pending = self.inner.pending.lock();
        let is_current = pending
            .get(request_token)
            .is_some_and(|entry| entry.generation == generation);
        let entry = if is_current {
            pending.remove(request_token)
        } else {
            None
        };
        (entry, pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_cancel_only_removes_its_own_registration() {
        let correlator = OAuthCorrelator::new(LONG);
        let stale = correlator.begin_wait("req-1");
        let _current = correlator.begin_wait("req-1");

        // The superseded handle no longer owns the entry
        correlator.cancel(stale);
        assert_eq!(correlator.pending_count(), 1);

        let withdrawn = correlator.begin_wait("req-2");
        correlator.cancel(withdrawn);
        assert_eq!(correlator.pending_count(), 1);
        assert!(!correlator.complete("req-2", "v"));
        assert!(correlator.complete("req-1", "v"));
    }

    #[tokio::test]
    async fn test_complete_resolves_wait() {
        let correlator = OAuthCorrelator::new(LONG);
        let wait = correlator.begin_wait("req-1");
        assert_eq!(correlator.pending_count(), 1);

        assert!(correlator.complete("req-1", "verifier-1"));
        assert_eq!(
            wait.wait().await,
            Ok(CallbackData {
                oauth_token: "req-1".into(),
                oauth_verifier: "verifier-1".into(),
            })
        );

        // A replayed callback changes nothing
        assert!(!correlator.complete("req-1", "verifier-2"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_token_is_ignored() {
        let correlator = OAuthCorrelator::new(LONG);
        let wait = correlator.begin_wait("req-1");

        assert!(!correlator.complete("forged", "verifier"));
        assert_eq!(correlator.pending_count(), 1);

        correlator.complete("req-1", "verifier");
        assert!(wait.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_then_late_callback() {
        let correlator = OAuthCorrelator::new(LONG);
        let wait = correlator.begin_wait_with_timeout("req-1", Duration::from_millis(20));

        assert_eq!(wait.wait().await, Err(WaitError::Timeout));
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.complete("req-1", "too-late"));
    }

    #[tokio::test]
    async fn test_completed_wait_does_not_time_out() {
        let correlator = OAuthCorrelator::new(LONG);
        let wait = correlator.begin_wait_with_timeout("req-1", Duration::from_millis(20));
        correlator.complete("req-1", "verifier");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(wait.wait().await.unwrap().oauth_verifier, "verifier");
    }

    #[tokio::test]
    async fn test_reregistration_supersedes() {
        let correlator = OAuthCorrelator::new(LONG);
        let first = correlator.begin_wait_with_timeout("req-1", Duration::from_millis(20));
        let second = correlator.begin_wait("req-1");
        assert_eq!(first.wait().await, Err(WaitError::Superseded));

        // The first registration's timer must not expire the second one
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(correlator.pending_count(), 1);

        assert!(correlator.complete("req-1", "verifier"));
        assert!(second.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_dropped_before_callback() {
        let correlator = OAuthCorrelator::new(LONG);
        drop(correlator.begin_wait("req-1"));

        // Still consumed, nothing to deliver to
        assert!(correlator.complete("req-1", "verifier"));
        assert_eq!(correlator.pending_count(), 0);
    }
}
