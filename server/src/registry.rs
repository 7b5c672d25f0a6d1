//! The bounded set of currently connected sessions: admission control,
//! lookup by logged-in username, and the drain/quiesce rendezvous used by
//! graceful shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};

use crate::client::ClientSession;
use crate::player::Player;

struct Entry {
    session: Arc<ClientSession>,
    _permit: OwnedSemaphorePermit,
}

pub struct ClientRegistry {
    sessions: Mutex<Vec<Entry>>,
    accepting: AtomicBool,
    admission: Arc<Semaphore>,
    empty: Notify,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        ClientRegistry {
            sessions: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
            admission: Arc::new(Semaphore::new(max_clients)),
            empty: Notify::new(),
        }
    }

    /// Register a newly accepted session. Blocks while the registry is at
    /// capacity (the 65th simultaneous registration with `MAX_CLIENTS = 64`
    /// waits here until some session unregisters); fails immediately once
    /// shutdown has begun.
    pub async fn register(&self, session: Arc<ClientSession>) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            return false;
        }
        let permit = match self.admission.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return false,
        };
        if !self.accepting.load(Ordering::Acquire) {
            return false;
        }
        self.sessions.lock().await.push(Entry {
            session,
            _permit: permit,
        });
        true
    }

    /// Remove `session`, logging it out first if still logged in. When the
    /// population reaches zero, wakes any task blocked in `wait_for_empty`.
    pub async fn unregister(&self, ctx: &crate::context::ServerContext, session: &Arc<ClientSession>) {
        let _ = session.logout(ctx).await;
        let mut sessions = self.sessions.lock().await;
        if let Some(pos) = sessions.iter().position(|e| Arc::ptr_eq(&e.session, session)) {
            sessions.remove(pos);
        }
        if sessions.is_empty() {
            self.empty.notify_waiters();
        }
    }

    /// The unique logged-in session under `name`, if any.
    pub async fn lookup(&self, name: &str) -> Option<Arc<ClientSession>> {
        for entry in self.sessions.lock().await.iter() {
            if entry.session.name().await.as_deref() == Some(name) {
                return Some(entry.session.clone());
            }
        }
        None
    }

    /// A snapshot of every currently logged-in session's player.
    pub async fn all_players(&self) -> Vec<Arc<Player>> {
        let mut out = Vec::new();
        for entry in self.sessions.lock().await.iter() {
            if let Some(p) = entry.session.player().await {
                out.push(p);
            }
        }
        out
    }

    /// Stop accepting new registrations and force end-of-stream on every
    /// currently registered session's read side.
    pub async fn shutdown_all(&self) {
        self.accepting.store(false, Ordering::Release);
        for entry in self.sessions.lock().await.iter() {
            entry.session.shutdown_read();
        }
    }

    /// Blocks until the registered population reaches zero.
    pub async fn wait_for_empty(&self) {
        loop {
            // Subscribe before checking so a notification fired between the
            // check and the await is never missed.
            let notified = self.empty.notified();
            if self.sessions.lock().await.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
