//! An invitation is shared between the two sessions it connects: the
//! "source" that proposed it and the "target" that may accept or decline.
//! It starts OPEN, becomes ACCEPTED (with an embedded Game) if the target
//! accepts, and becomes CLOSED, terminally, however the game or the offer
//! ends.

use std::sync::{Arc, Mutex};

use protocol::GameRole;

use crate::client::ClientSession;
use crate::game::{Game, GameError, Result_};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationState {
    Open,
    Accepted,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum InvitationError {
    #[error("invitation is not in the open state")]
    NotOpen,
    #[error("invitation is not in the accepted state")]
    NotAccepted,
    #[error("illegal move: {0}")]
    IllegalMove(#[from] GameError),
}

struct Inner {
    state: InvitationState,
    game: Option<Game>,
}

pub struct Invitation {
    pub source: Arc<ClientSession>,
    pub target: Arc<ClientSession>,
    pub source_role: GameRole,
    pub target_role: GameRole,
    /// The id this invitation is filed under in the source's own invite map.
    pub source_id: u8,
    /// The id this invitation is filed under in the target's own invite map.
    pub target_id: u8,
    inner: Mutex<Inner>,
}

impl Invitation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<ClientSession>,
        target: Arc<ClientSession>,
        source_role: GameRole,
        target_role: GameRole,
        source_id: u8,
        target_id: u8,
    ) -> Arc<Self> {
        Arc::new(Invitation {
            source,
            target,
            source_role,
            target_role,
            source_id,
            target_id,
            inner: Mutex::new(Inner {
                state: InvitationState::Open,
                game: None,
            }),
        })
    }

    pub fn state(&self) -> InvitationState {
        self.inner.lock().unwrap().state
    }

    /// Role of `session` in this invitation's game, if it is a participant.
    pub fn role_of(&self, session: &Arc<ClientSession>) -> Option<GameRole> {
        if Arc::ptr_eq(session, &self.source) {
            Some(self.source_role)
        } else if Arc::ptr_eq(session, &self.target) {
            Some(self.target_role)
        } else {
            None
        }
    }

    /// This invitation's id in `session`'s own invite map, and in the other
    /// participant's invite map, if `session` is a participant.
    pub fn ids_for(&self, session: &Arc<ClientSession>) -> Option<(u8, u8)> {
        if Arc::ptr_eq(session, &self.source) {
            Some((self.source_id, self.target_id))
        } else if Arc::ptr_eq(session, &self.target) {
            Some((self.target_id, self.source_id))
        } else {
            None
        }
    }

    /// The participant on the other side of `session`, if it is one.
    pub fn peer_of(&self, session: &Arc<ClientSession>) -> Option<&Arc<ClientSession>> {
        if Arc::ptr_eq(session, &self.source) {
            Some(&self.target)
        } else if Arc::ptr_eq(session, &self.target) {
            Some(&self.source)
        } else {
            None
        }
    }

    /// OPEN -> ACCEPTED, creating the embedded Game.
    pub fn accept(&self) -> Result<(), InvitationError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != InvitationState::Open {
            return Err(InvitationError::NotOpen);
        }
        inner.state = InvitationState::Accepted;
        inner.game = Some(Game::new());
        Ok(())
    }

    /// OPEN -> CLOSED, used by revoke and decline; no resignation involved.
    pub fn close_open(&self) -> Result<(), InvitationError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != InvitationState::Open {
            return Err(InvitationError::NotOpen);
        }
        inner.state = InvitationState::Closed;
        Ok(())
    }

    /// ACCEPTED -> CLOSED, resigning the embedded game on behalf of `role`.
    pub fn close_accepted(&self, role: GameRole) -> Result<Result_, InvitationError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != InvitationState::Accepted {
            return Err(InvitationError::NotAccepted);
        }
        let game = inner
            .game
            .as_mut()
            .expect("accepted invitation always has a game");
        game.resign(role)
            .expect("game cannot already be terminated while invitation is still accepted");
        let result = game.result();
        inner.state = InvitationState::Closed;
        Ok(result)
    }

    /// Parse and apply a move against the embedded game. Returns the
    /// rendered board and, if the move ended the game, its result.
    pub fn make_move(
        &self,
        role: GameRole,
        move_str: &str,
    ) -> Result<(String, Option<Result_>), InvitationError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != InvitationState::Accepted {
            return Err(InvitationError::NotAccepted);
        }
        let game = inner
            .game
            .as_mut()
            .expect("accepted invitation always has a game");
        let mv = game.parse_move(role, move_str)?;
        game.apply(mv)?;
        let board = game.render();
        if game.terminated() {
            let result = game.result();
            inner.state = InvitationState::Closed;
            Ok((board, Some(result)))
        } else {
            Ok((board, None))
        }
    }

    /// The rendered starting position, used as the `accept` reply's payload.
    pub fn initial_board(&self) -> String {
        Game::new().render()
    }
}
