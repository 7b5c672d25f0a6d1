//! Per-connection session state: login status, the set of outstanding
//! invitations with their locally-assigned ids, and a serialized write path
//! to the peer's socket.

use std::collections::HashMap;
use std::sync::Arc;

use protocol::{GameRole, Header};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex as AsyncMutex;

use crate::context::ServerContext;
use crate::game::from_role_result;
use crate::id_alloc::IdAllocator;
use crate::invitation::{Invitation, InvitationError, InvitationState};
use crate::player::{self, Player};
use crate::transport::ReadShutdown;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("already logged in")]
    AlreadyLoggedIn,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("that username is already taken by another connected session")]
    NameTaken,
    #[error("cannot invite yourself")]
    InviteSelf,
    #[error("no such target session, or it is not logged in")]
    NoSuchTarget,
    #[error("no invitation with that id")]
    UnknownInvitation,
    #[error("this session is not the source of that invitation")]
    NotSource,
    #[error("this session is not the target of that invitation")]
    NotTarget,
    #[error("this session is not a participant in that invitation")]
    NotParticipant,
    #[error("unrecognized packet type {0}")]
    UnknownPacketType(u8),
    #[error("invitation role must be FIRST or SECOND, not NONE")]
    InvalidRole,
    #[error(transparent)]
    Invitation(#[from] InvitationError),
    #[error(transparent)]
    Io(#[from] protocol::ProtocolError),
}

enum Status {
    LoggedOut,
    LoggedIn(Arc<Player>),
}

struct State {
    status: Status,
    invites: HashMap<u8, Arc<Invitation>>,
    ids: IdAllocator,
    writer: Box<dyn AsyncWrite + Unpin + Send>,
}

/// One connected client. Holds the socket's write half and all mutable
/// session state behind a single async mutex, so that socket writes and
/// state mutation are always serialized together.
pub struct ClientSession {
    state: AsyncMutex<State>,
    shutdown: Box<dyn ReadShutdown>,
}

impl ClientSession {
    pub fn new(
        writer: impl AsyncWrite + Unpin + Send + 'static,
        shutdown: Box<dyn ReadShutdown>,
    ) -> Arc<Self> {
        Arc::new(ClientSession {
            state: AsyncMutex::new(State {
                status: Status::LoggedOut,
                invites: HashMap::new(),
                ids: IdAllocator::new(),
                writer: Box::new(writer),
            }),
            shutdown,
        })
    }

    pub fn shutdown_read(&self) {
        self.shutdown.shutdown_read();
    }

    async fn send(&self, header: Header, payload: &[u8]) -> Result<(), protocol::ProtocolError> {
        let mut state = self.state.lock().await;
        protocol::send(&mut state.writer, &header, payload).await
    }

    pub async fn ack(&self, id: u8, payload: &[u8]) -> Result<(), protocol::ProtocolError> {
        self.send(
            Header::new(protocol::ACK, id, GameRole::None, payload.len() as u16),
            payload,
        )
        .await
    }

    pub async fn nack(&self) -> Result<(), protocol::ProtocolError> {
        self.send(Header::empty(protocol::NACK, 0, GameRole::None), &[])
            .await
    }

    pub async fn player(&self) -> Option<Arc<Player>> {
        match &self.state.lock().await.status {
            Status::LoggedIn(p) => Some(p.clone()),
            Status::LoggedOut => None,
        }
    }

    pub async fn name(&self) -> Option<String> {
        self.player().await.map(|p| p.name().to_string())
    }

    pub async fn is_logged_in(&self) -> bool {
        matches!(self.state.lock().await.status, Status::LoggedIn(_))
    }

    async fn get_invite(&self, id: u8) -> Option<Arc<Invitation>> {
        self.state.lock().await.invites.get(&id).cloned()
    }

    async fn remove_invite(&self, id: u8) {
        let mut state = self.state.lock().await;
        if state.invites.remove(&id).is_some() {
            state.ids.free(id);
        }
    }

    // -- session operations, each invoked by the session driver on packet dispatch --

    pub async fn login(&self, ctx: &ServerContext, name: &str) -> Result<(), SessionError> {
        let _permit = ctx.coordination.login().await;
        if self.is_logged_in().await {
            return Err(SessionError::AlreadyLoggedIn);
        }
        if ctx.registry.lookup(name).await.is_some() {
            return Err(SessionError::NameTaken);
        }
        let player = ctx.players.register(name);
        self.state.lock().await.status = Status::LoggedIn(player);
        tracing::info!(name, "session logged in");
        Ok(())
    }

    /// Valid only while logged in. Resigns/revokes/declines every
    /// outstanding invitation, then releases the bound player. Idempotent:
    /// already-logged-out is a no-op failure, not a panic.
    pub async fn logout(self: &Arc<Self>, ctx: &ServerContext) -> Result<(), SessionError> {
        let _permit = ctx.coordination.logout().await;
        if !self.is_logged_in().await {
            return Err(SessionError::NotLoggedIn);
        }
        let name = self.name().await.unwrap_or_default();

        let invites: Vec<(u8, Arc<Invitation>)> = self
            .state
            .lock()
            .await
            .invites
            .iter()
            .map(|(id, inv)| (*id, inv.clone()))
            .collect();
        for (_id, inv) in &invites {
            let _ = self.close_invitation_for_logout(ctx, inv).await;
        }

        let mut state = self.state.lock().await;
        for (id, _inv) in &invites {
            state.ids.free(*id);
        }
        state.status = Status::LoggedOut;
        state.invites.clear();
        tracing::info!(%name, invitations_closed = invites.len(), "session logged out");
        Ok(())
    }

    async fn close_invitation_for_logout(
        self: &Arc<Self>,
        ctx: &ServerContext,
        inv: &Arc<Invitation>,
    ) -> Result<(), SessionError> {
        let role = inv.role_of(self).ok_or(SessionError::NotParticipant)?;
        match inv.state() {
            InvitationState::Accepted => {
                let result = inv.close_accepted(role)?;
                let (_own_id, peer_id) = inv.ids_for(self).expect("self is a participant");
                let peer = inv.peer_of(self).expect("self is a participant").clone();
                peer.remove_invite(peer_id).await;
                peer.send(Header::empty(protocol::RESIGNED, peer_id, GameRole::None), &[])
                    .await?;
                self.post_rating_update(&peer, role, result).await;
                tracing::debug!("invitation resigned by logout");
                Ok(())
            }
            InvitationState::Open if Arc::ptr_eq(self, &inv.source) => {
                inv.close_open()?;
                inv.target.remove_invite(inv.target_id).await;
                inv.target
                    .send(Header::empty(protocol::REVOKED, inv.target_id, GameRole::None), &[])
                    .await?;
                tracing::debug!("invitation revoked by logout");
                Ok(())
            }
            InvitationState::Open => {
                inv.close_open()?;
                inv.source.remove_invite(inv.source_id).await;
                inv.source
                    .send(Header::empty(protocol::DECLINED, inv.source_id, GameRole::None), &[])
                    .await?;
                tracing::debug!("invitation declined by logout");
                Ok(())
            }
            InvitationState::Closed => Ok(()),
        }
    }

    async fn post_rating_update(
        &self,
        opponent: &Arc<ClientSession>,
        my_role: GameRole,
        result: crate::game::Result_,
    ) {
        if let (Some(me), Some(them)) = (self.player().await, opponent.player().await) {
            let my_result = from_role_result(my_role, result);
            player::post_result(&me, &them, my_result);
            tracing::debug!(
                me = me.name(),
                them = them.name(),
                me_rating = me.rating(),
                them_rating = them.rating(),
                "rating update posted"
            );
        }
    }

    pub async fn make_invitation(
        self: &Arc<Self>,
        ctx: &ServerContext,
        target_name: &str,
        source_role: GameRole,
        target_role: GameRole,
    ) -> Result<u8, SessionError> {
        let _permit = ctx.coordination.invite_op().await;
        if !self.is_logged_in().await {
            return Err(SessionError::NotLoggedIn);
        }
        let target = ctx
            .registry
            .lookup(target_name)
            .await
            .ok_or(SessionError::NoSuchTarget)?;
        if Arc::ptr_eq(self, &target) {
            return Err(SessionError::InviteSelf);
        }

        let source_id = self.state.lock().await.ids.alloc();
        let target_id = target.state.lock().await.ids.alloc();

        let inv = Invitation::new(
            self.clone(),
            target.clone(),
            source_role,
            target_role,
            source_id,
            target_id,
        );
        self.state.lock().await.invites.insert(source_id, inv.clone());
        target.state.lock().await.invites.insert(target_id, inv.clone());

        let source_name = self.name().await.unwrap_or_default();
        target
            .send(
                Header::new(protocol::INVITED, target_id, target_role, source_name.len() as u16),
                source_name.as_bytes(),
            )
            .await?;
        tracing::debug!(
            source = %source_name,
            target = %target_name,
            source_id,
            target_id,
            "invitation created"
        );
        Ok(source_id)
    }

    pub async fn revoke(self: &Arc<Self>, ctx: &ServerContext, id: u8) -> Result<(), SessionError> {
        let _permit = ctx.coordination.invite_op().await;
        let inv = self.get_invite(id).await.ok_or(SessionError::UnknownInvitation)?;
        if !Arc::ptr_eq(self, &inv.source) {
            return Err(SessionError::NotSource);
        }
        inv.close_open()?;
        self.remove_invite(id).await;
        inv.target.remove_invite(inv.target_id).await;
        inv.target
            .send(Header::empty(protocol::REVOKED, inv.target_id, GameRole::None), &[])
            .await?;
        tracing::debug!(id, "invitation revoked");
        Ok(())
    }

    pub async fn decline(self: &Arc<Self>, ctx: &ServerContext, id: u8) -> Result<(), SessionError> {
        let _permit = ctx.coordination.invite_op().await;
        let inv = self.get_invite(id).await.ok_or(SessionError::UnknownInvitation)?;
        if !Arc::ptr_eq(self, &inv.target) {
            return Err(SessionError::NotTarget);
        }
        inv.close_open()?;
        self.remove_invite(id).await;
        inv.source.remove_invite(inv.source_id).await;
        inv.source
            .send(Header::empty(protocol::DECLINED, inv.source_id, GameRole::None), &[])
            .await?;
        tracing::debug!(id, "invitation declined");
        Ok(())
    }

    /// On success, returns the rendered initial board when this (target)
    /// session is to move first, otherwise `None` — the caller uses this as
    /// the ACK payload.
    pub async fn accept(self: &Arc<Self>, ctx: &ServerContext, id: u8) -> Result<Option<String>, SessionError> {
        let _permit = ctx.coordination.invite_op().await;
        let inv = self.get_invite(id).await.ok_or(SessionError::UnknownInvitation)?;
        if !Arc::ptr_eq(self, &inv.target) {
            return Err(SessionError::NotTarget);
        }
        inv.accept()?;
        let board = inv.initial_board();

        let source_payload: &[u8] = if inv.source_role == GameRole::First {
            board.as_bytes()
        } else {
            b""
        };
        inv.source
            .send(
                Header::new(
                    protocol::ACCEPTED,
                    inv.source_id,
                    GameRole::None,
                    source_payload.len() as u16,
                ),
                source_payload,
            )
            .await?;
        tracing::debug!(id, "invitation accepted, game started");

        Ok(if inv.target_role == GameRole::First {
            Some(board)
        } else {
            None
        })
    }

    pub async fn resign(self: &Arc<Self>, ctx: &ServerContext, id: u8) -> Result<(), SessionError> {
        let _permit = ctx.coordination.invite_op().await;
        let inv = self.get_invite(id).await.ok_or(SessionError::UnknownInvitation)?;
        let role = inv.role_of(self).ok_or(SessionError::NotParticipant)?;
        let result = inv.close_accepted(role)?;
        let (_own_id, peer_id) = inv.ids_for(self).expect("self is a participant");
        let peer = inv.peer_of(self).expect("self is a participant").clone();

        self.remove_invite(id).await;
        peer.remove_invite(peer_id).await;
        peer.send(Header::empty(protocol::RESIGNED, peer_id, GameRole::None), &[])
            .await?;
        self.post_rating_update(&peer, role, result).await;
        tracing::info!(id, "game resigned");
        Ok(())
    }

    pub async fn make_move(
        self: &Arc<Self>,
        ctx: &ServerContext,
        id: u8,
        move_str: &str,
    ) -> Result<(), SessionError> {
        let _permit = ctx.coordination.invite_op().await;
        let inv = self.get_invite(id).await.ok_or(SessionError::UnknownInvitation)?;
        let role = inv.role_of(self).ok_or(SessionError::NotParticipant)?;
        let (own_id, peer_id) = inv.ids_for(self).expect("self is a participant");
        let peer = inv.peer_of(self).expect("self is a participant").clone();

        let (board, outcome) = inv.make_move(role, move_str)?;
        peer.send(
            Header::new(protocol::MOVED, peer_id, GameRole::None, board.len() as u16),
            board.as_bytes(),
        )
        .await?;

        if let Some(result) = outcome {
            let winner_role = match result {
                crate::game::Result_::Draw => GameRole::None,
                crate::game::Result_::FirstWins => GameRole::First,
                crate::game::Result_::SecondWins => GameRole::Second,
            };
            self.remove_invite(own_id).await;
            peer.remove_invite(peer_id).await;
            self.send(Header::empty(protocol::ENDED, own_id, winner_role), &[]).await?;
            peer.send(Header::empty(protocol::ENDED, peer_id, winner_role), &[]).await?;
            self.post_rating_update(&peer, role, result).await;
            tracing::info!(id, ?result, "game ended");
        }
        Ok(())
    }

    /// Every currently logged-in player's name and rating, for the `USERS` reply.
    pub async fn users_payload(ctx: &ServerContext) -> String {
        let mut out = String::new();
        for p in ctx.registry.all_players().await {
            out.push_str(&format!("{}\t{}\n", p.name(), p.rating()));
        }
        out
    }
}
