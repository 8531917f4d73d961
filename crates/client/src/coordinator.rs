//! Single-flight token refresh.
//!
//! One instance per application session, shared by every pipeline that may
//! see a 401. The first caller starts the exchange on its own task; every
//! caller (the one that started it included) then waits on the shared slot
//! and observes the same outcome. The exchange runs to completion even if
//! all callers go away.
//!
//! The `refreshing` flag and the slot are only ever changed together, under
//! the same lock, so a waiter can never subscribe to a slot that will not be
//! completed.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    /// A refresh is running (or none has run yet).
    Empty,
    Token(String),
    Failed,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("token refresh failed")]
pub struct RefreshFailed;

pub struct RefreshCoordinator {
    refreshing: Mutex<bool>,
    slot: watch::Sender<Slot>,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(Slot::Empty);
        Self {
            refreshing: Mutex::new(false),
            slot,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        *self.lock()
    }

    /// Obtain an access token newer than `rejected`.
    ///
    /// With no exchange in flight, `current` is read under the coordinator
    /// lock: a stored token other than `rejected` is returned as-is.
    /// Otherwise `refresh` is started on a background task (at most once per
    /// flight) or the running flight is joined.
    pub async fn run<C, F, Fut, E>(
        self: &Arc<Self>,
        rejected: Option<&str>,
        current: C,
        refresh: F,
    ) -> Result<String, RefreshFailed>
    where
        C: FnOnce() -> Option<String>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (mut rx, exchange) = {
            let mut refreshing = self.lock();
            if *refreshing {
                (self.slot.subscribe(), None)
            } else {
                if let Some(token) = current().filter(|token| Some(token.as_str()) != rejected) {
                    tracing::debug!("access token already rotated; no refresh needed");
                    return Ok(token);
                }
                *refreshing = true;
                // Late joiners must not pick up the previous flight's token.
                self.slot.send_replace(Slot::Empty);
                (self.slot.subscribe(), Some(refresh()))
            }
        };

        match exchange {
            Some(exchange) => {
                tracing::debug!("starting token refresh");
                let flight = Flight {
                    coordinator: Arc::clone(self),
                    done: false,
                };
                tokio::spawn(async move {
                    match exchange.await {
                        Ok(token) => flight.complete(Slot::Token(token)),
                        Err(e) => {
                            tracing::warn!(error = %e, "token refresh failed");
                            flight.complete(Slot::Failed);
                        }
                    }
                });
            }
            None => tracing::debug!("joining in-flight token refresh"),
        }

        let outcome = rx
            .wait_for(|slot| *slot != Slot::Empty)
            .await
            .map(|slot| slot.clone());
        match outcome {
            Ok(Slot::Token(token)) => Ok(token),
            _ => Err(RefreshFailed),
        }
    }

    fn finish(&self, outcome: Slot) {
        let mut refreshing = self.lock();
        *refreshing = false;
        self.slot.send_replace(outcome);
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.refreshing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The exchange task's obligation to release waiters, even if it panics.
struct Flight {
    coordinator: Arc<RefreshCoordinator>,
    done: bool,
}

impl Flight {
    fn complete(mut self, outcome: Slot) {
        self.done = true;
        self.coordinator.finish(outcome);
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        if !self.done {
            tracing::error!("token refresh task died; releasing waiters with a failure");
            self.coordinator.finish(Slot::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;

    async fn until_refreshing(coordinator: &RefreshCoordinator) {
        while !coordinator.is_refreshing() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            let gate = gate.clone();
            tasks.push(tokio::spawn(async move {
                coordinator
                    .run(Some("A1"), || Some("A1".to_string()), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok::<_, String>("A2".to_string())
                    })
                    .await
            }));
        }

        until_refreshing(&coordinator).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        for task in tasks {
            assert_eq!(task.await.unwrap(), Ok("A2".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn waiters_receive_the_leaders_failure() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let gate = Arc::new(Notify::new());

        let leader = tokio::spawn({
            let coordinator = coordinator.clone();
            let gate = gate.clone();
            async move {
                coordinator
                    .run(None, || None, move || async move {
                        gate.notified().await;
                        Err::<String, _>("refresh token expired")
                    })
                    .await
            }
        });
        until_refreshing(&coordinator).await;

        let follower = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .run(None, || None, || async { Ok::<_, String>("never".to_string()) })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();

        assert_eq!(leader.await.unwrap(), Err(RefreshFailed));
        assert_eq!(follower.await.unwrap(), Err(RefreshFailed));
    }

    #[tokio::test]
    async fn later_flights_do_not_reuse_stale_tokens() {
        let coordinator = Arc::new(RefreshCoordinator::new());

        let first = coordinator
            .run(Some("A1"), || Some("A1".to_string()), || async { Ok::<_, String>("A2".to_string()) })
            .await;
        let second = coordinator
            .run(Some("A2"), || Some("A2".to_string()), || async { Ok::<_, String>("A3".to_string()) })
            .await;

        assert_eq!(first, Ok("A2".to_string()));
        assert_eq!(second, Ok("A3".to_string()));
    }

    #[tokio::test]
    async fn already_rotated_token_is_returned_without_an_exchange() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let token = coordinator
            .run(Some("A1"), || Some("A2".to_string()), {
                let calls = calls.clone();
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("A3".to_string())
                }
            })
            .await;

        assert_eq!(token, Ok("A2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn token_stored_just_before_the_flight_ends_is_reused() {
        // The exchange stores the new token and only then releases the flag;
        // a caller that observed the flag but arrives after the release must
        // reuse the token rather than start a second exchange.
        let coordinator = Arc::new(RefreshCoordinator::new());
        let stored = Arc::new(Mutex::new(Some("A1".to_string())));
        let calls = Arc::new(AtomicUsize::new(0));

        let exchange = {
            let stored = stored.clone();
            let calls = calls.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                *stored.lock().unwrap() = Some("A2".to_string());
                Ok::<_, String>("A2".to_string())
            }
        };
        let first = coordinator
            .run(Some("A1"), || stored.lock().unwrap().clone(), exchange)
            .await;
        assert_eq!(first, Ok("A2".to_string()));
        assert!(!coordinator.is_refreshing());

        let late = coordinator
            .run(Some("A1"), || stored.lock().unwrap().clone(), || async {
                Ok::<_, String>("A3".to_string())
            })
            .await;

        assert_eq!(late, Ok("A2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn aborted_leader_does_not_cancel_the_exchange() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let gate = Arc::new(Notify::new());
        let finished = Arc::new(AtomicUsize::new(0));

        let leader = tokio::spawn({
            let coordinator = coordinator.clone();
            let gate = gate.clone();
            let finished = finished.clone();
            async move {
                coordinator
                    .run(None, || None, move || async move {
                        gate.notified().await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, String>("A2".to_string())
                    })
                    .await
            }
        });
        until_refreshing(&coordinator).await;

        let follower = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .run(None, || None, || async { Ok::<_, String>("unused".to_string()) })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert!(coordinator.is_refreshing());

        gate.notify_one();

        assert_eq!(follower.await.unwrap(), Ok("A2".to_string()));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn panicking_exchange_releases_waiters() {
        let coordinator = Arc::new(RefreshCoordinator::new());

        let outcome = coordinator
            .run(None, || None, || async {
                if true {
                    panic!("exchange blew up");
                }
                Ok::<_, String>("never".to_string())
            })
            .await;

        assert_eq!(outcome, Err(RefreshFailed));
        assert!(!coordinator.is_refreshing());
    }
}
