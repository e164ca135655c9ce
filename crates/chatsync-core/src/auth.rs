//! Authentication state as seen by the sync engine
//!
//! The engine never authenticates anyone; it only needs to know whether the
//! remote store may be used right now, and to be told when that changes.

use tokio::sync::watch;

/// Source of the signed-in flag
pub trait AuthState: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Receiver that observes every sign-in / sign-out transition
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Watch-channel backed auth state
#[derive(Debug)]
pub struct AuthHandle {
    tx: watch::Sender<bool>,
}

impl AuthHandle {
    pub fn new(authenticated: bool) -> Self {
        let (tx, _rx) = watch::channel(authenticated);
        Self { tx }
    }

    /// Publish a new signed-in flag; observers only wake on actual changes
    pub fn set_authenticated(&self, authenticated: bool) {
        self.tx.send_if_modified(|current| {
            if *current == authenticated {
                false
            } else {
                *current = authenticated;
                true
            }
        });
    }
}

impl Default for AuthHandle {
    fn default() -> Self {
        Self::new(false)
    }
}

impl AuthState for AuthHandle {
    fn is_authenticated(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_handle_default_signed_out() {
        let auth = AuthHandle::default();
        assert!(!auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_transition_is_observed() {
        let auth = AuthHandle::new(false);
        let mut rx = auth.subscribe();

        auth.set_authenticated(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
        assert!(auth.is_authenticated());
    }

    #[test]
    fn test_same_value_does_not_notify() {
        let auth = AuthHandle::new(true);
        let rx = auth.subscribe();
        auth.set_authenticated(true);
        assert!(!rx.has_changed().unwrap());
    }
}
