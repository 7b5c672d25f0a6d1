//! The process-wide singletons injected into every session: the player and
//! client registries and the coordinating semaphores (spec.md §9: "model as
//! explicit singletons owned by the process-entry component; inject into
//! sessions at construction; no hidden access").

use crate::coordination::Coordination;
use crate::player::PlayerRegistry;
use crate::registry::ClientRegistry;

pub struct ServerContext {
    pub players: PlayerRegistry,
    pub registry: ClientRegistry,
    pub coordination: Coordination,
}

impl ServerContext {
    pub fn new(max_clients: usize) -> Self {
        ServerContext {
            players: PlayerRegistry::new(),
            registry: ClientRegistry::new(max_clients),
            coordination: Coordination::new(),
        }
    }
}
