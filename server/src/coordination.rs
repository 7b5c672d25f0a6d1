//! Process-global permits that serialize the high-level multi-object
//! operations described in spec.md §5: one login/logout/invite-workflow at
//! a time across the whole server, so that ordering guarantees hold without
//! per-pair lock ordering.

use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Default)]
pub struct Coordination {
    login: Semaphore,
    logout: Semaphore,
    invite_op: Semaphore,
}

impl Coordination {
    pub fn new() -> Self {
        Coordination {
            login: Semaphore::new(1),
            logout: Semaphore::new(1),
            invite_op: Semaphore::new(1),
        }
    }

    pub async fn login(&self) -> SemaphorePermit<'_> {
        self.login.acquire().await.expect("login semaphore is never closed")
    }

    pub async fn logout(&self) -> SemaphorePermit<'_> {
        self.logout.acquire().await.expect("logout semaphore is never closed")
    }

    /// Serializes the outer workflow of invite/revoke/decline/accept/resign/move.
    pub async fn invite_op(&self) -> SemaphorePermit<'_> {
        self.invite_op
            .acquire()
            .await
            .expect("invite_op semaphore is never closed")
    }
}
