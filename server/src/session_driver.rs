//! The per-connection receive/dispatch loop: register with the client
//! registry, read and dispatch packets until end-of-stream, then tear down.

use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::client::ClientSession;
use crate::context::ServerContext;

/// Drive one already-registered session to completion. `reader` is the
/// connection's read half; `session` shares the same connection's write half.
pub async fn run(ctx: Arc<ServerContext>, session: Arc<ClientSession>, mut reader: impl AsyncRead + Unpin) {
    loop {
        let packet = match protocol::recv(&mut reader).await {
            Ok(packet) => packet,
            Err(protocol::ProtocolError::Eof) => {
                tracing::debug!("connection closed cleanly");
                break;
            }
            Err(e @ protocol::ProtocolError::InvalidRole(_)) => {
                // Header and payload are already fully drained; the stream
                // is still framed, so NACK and keep the session alive.
                tracing::debug!(error = %e, "malformed role byte, replying NACK");
                if session.nack().await.is_err() {
                    break;
                }
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "transport error, terminating session");
                break;
            }
        };

        if let Err(e) = dispatch(&ctx, &session, packet).await {
            tracing::debug!(error = %e, "session operation failed, replying NACK");
            if session.nack().await.is_err() {
                break;
            }
        }
    }

    ctx.registry.unregister(&ctx, &session).await;
}

async fn dispatch(
    ctx: &Arc<ServerContext>,
    session: &Arc<ClientSession>,
    packet: protocol::Packet,
) -> Result<(), crate::client::SessionError> {
    use crate::client::SessionError;

    match packet.header.packet_type {
        protocol::LOGIN => {
            if !session.is_logged_in().await {
                let name = String::from_utf8_lossy(&packet.payload).into_owned();
                session.login(ctx, &name).await?;
                session.ack(0, &[]).await?;
                Ok(())
            } else {
                Err(SessionError::AlreadyLoggedIn)
            }
        }
        other if !session.is_logged_in().await => {
            // Protocol error: only LOGIN is honored while logged out.
            let _ = other;
            Err(SessionError::NotLoggedIn)
        }
        protocol::USERS => {
            let payload = ClientSession::users_payload(ctx).await;
            session.ack(0, payload.as_bytes()).await?;
            Ok(())
        }
        protocol::INVITE => {
            if packet.header.role == protocol::GameRole::None {
                return Err(SessionError::InvalidRole);
            }
            let target_name = String::from_utf8_lossy(&packet.payload).into_owned();
            let target_role = packet.header.role;
            let source_role = target_role.other();
            let id = session
                .make_invitation(ctx, &target_name, source_role, target_role)
                .await?;
            session.ack(id, &[]).await?;
            Ok(())
        }
        protocol::REVOKE => {
            session.revoke(ctx, packet.header.id).await?;
            session.ack(packet.header.id, &[]).await?;
            Ok(())
        }
        protocol::ACCEPT => {
            let board = session.accept(ctx, packet.header.id).await?;
            let payload = board.unwrap_or_default();
            session.ack(packet.header.id, payload.as_bytes()).await?;
            Ok(())
        }
        protocol::DECLINE => {
            session.decline(ctx, packet.header.id).await?;
            session.ack(packet.header.id, &[]).await?;
            Ok(())
        }
        protocol::MOVE => {
            let move_str = String::from_utf8_lossy(&packet.payload).into_owned();
            session.make_move(ctx, packet.header.id, &move_str).await?;
            session.ack(packet.header.id, &[]).await?;
            Ok(())
        }
        protocol::RESIGN => {
            session.resign(ctx, packet.header.id).await?;
            session.ack(packet.header.id, &[]).await?;
            Ok(())
        }
        other => Err(SessionError::UnknownPacketType(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use protocol::{GameRole, Header};
    use tokio::io::DuplexStream;

    use super::*;
    use crate::client::ClientSession;
    use crate::transport::NullReadShutdown;

    /// One simulated client: `to_server`/`from_server` are this test's ends
    /// of the duplex pipe; the session driver is spawned on the other ends.
    struct Client {
        to_server: DuplexStream,
        from_server: DuplexStream,
    }

    impl Client {
        async fn send(&mut self, header: Header, payload: &[u8]) {
            protocol::send(&mut self.to_server, &header, payload).await.unwrap();
        }

        async fn recv(&mut self) -> protocol::Packet {
            protocol::recv(&mut self.from_server).await.unwrap()
        }

        async fn login(&mut self, name: &str) {
            self.send(Header::new(protocol::LOGIN, 0, GameRole::None, name.len() as u16), name.as_bytes())
                .await;
            let p = self.recv().await;
            assert_eq!(p.header.packet_type, protocol::ACK, "login failed for {name}");
        }

        async fn r#move(&mut self, id: u8, mv: &str) {
            self.send(Header::new(protocol::MOVE, id, GameRole::None, mv.len() as u16), mv.as_bytes())
                .await;
            let ack = self.recv().await;
            assert_eq!(ack.header.packet_type, protocol::ACK);
        }
    }

    fn spawn_client(ctx: &Arc<ServerContext>) -> Client {
        let (client_to_server, server_reads) = tokio::io::duplex(4096);
        let (server_writes, client_from_server) = tokio::io::duplex(4096);
        let session = ClientSession::new(server_writes, Box::new(NullReadShutdown));
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if ctx.registry.register(session.clone()).await {
                run(ctx, session, server_reads).await;
            }
        });
        Client {
            to_server: client_to_server,
            from_server: client_from_server,
        }
    }

    /// Log `a` and `b` in, have `a` invite `b` to play SECOND (so `a` itself
    /// plays FIRST) and `b` accept, draining every intervening notification.
    /// Returns each side's own invitation id.
    async fn set_up_accepted_game(a: &mut Client, b: &mut Client) -> (u8, u8) {
        a.login("a").await;
        b.login("b").await;

        // INVITE.role is the role the source wants the *target* to play.
        a.send(Header::new(protocol::INVITE, 0, GameRole::Second, 1), b"b").await;
        let ack = a.recv().await;
        assert_eq!(ack.header.packet_type, protocol::ACK);
        let a_inv_id = ack.header.id;
        let invited = b.recv().await;
        assert_eq!(invited.header.packet_type, protocol::INVITED);
        // INVITED.role is forwarded unchanged from the INVITE that caused it.
        assert_eq!(invited.header.role, GameRole::Second);
        let b_inv_id = invited.header.id;

        b.send(Header::empty(protocol::ACCEPT, b_inv_id, GameRole::None), &[]).await;
        let accept_ack = b.recv().await;
        assert_eq!(accept_ack.header.packet_type, protocol::ACK);
        let accepted = a.recv().await;
        assert_eq!(accepted.header.packet_type, protocol::ACCEPTED);

        (a_inv_id, b_inv_id)
    }

    #[tokio::test]
    async fn s1_users_before_login_is_nacked() {
        let ctx = Arc::new(ServerContext::new(8));
        let mut a = spawn_client(&ctx);
        a.send(Header::empty(protocol::USERS, 0, GameRole::None), &[]).await;
        let reply = a.recv().await;
        assert_eq!(reply.header.packet_type, protocol::NACK);
    }

    #[tokio::test]
    async fn s2_login_then_users_reports_initial_rating() {
        let ctx = Arc::new(ServerContext::new(8));
        let mut a = spawn_client(&ctx);
        a.login("a").await;
        a.send(Header::empty(protocol::USERS, 0, GameRole::None), &[]).await;
        let reply = a.recv().await;
        assert_eq!(reply.header.packet_type, protocol::ACK);
        assert_eq!(String::from_utf8(reply.payload).unwrap(), "a\t1500\n");
    }

    #[tokio::test]
    async fn s3_playing_to_a_win_updates_elo_by_the_known_split() {
        let ctx = Arc::new(ServerContext::new(8));
        let mut a = spawn_client(&ctx);
        let mut b = spawn_client(&ctx);
        let (a_inv_id, b_inv_id) = set_up_accepted_game(&mut a, &mut b).await;

        // a (First, X) wins along the top row: 1, 4, 2, 5, 3.
        a.r#move(a_inv_id, "1").await;
        let _ = b.recv().await; // MOVED
        b.r#move(b_inv_id, "4").await;
        let _ = a.recv().await; // MOVED
        a.r#move(a_inv_id, "2").await;
        let _ = b.recv().await; // MOVED
        b.r#move(b_inv_id, "5").await;
        let _ = a.recv().await; // MOVED
        // The winning move: `a`'s own stream carries its ENDED notification
        // and the ACK for the MOVE request itself, in no guaranteed order.
        a.send(Header::new(protocol::MOVE, a_inv_id, GameRole::None, 1), b"3").await;
        let a_first = a.recv().await;
        let a_second = a.recv().await;
        let a_types: Vec<u8> = vec![a_first.header.packet_type, a_second.header.packet_type];
        assert!(a_types.contains(&protocol::ACK));
        assert!(a_types.contains(&protocol::ENDED));

        let moved = b.recv().await; // final MOVED to b before its ENDED
        assert_eq!(moved.header.packet_type, protocol::MOVED);
        let ended_b = b.recv().await;
        assert_eq!(ended_b.header.packet_type, protocol::ENDED);
        assert_eq!(ended_b.header.role, GameRole::First);

        // Give the rating update a beat to land; no further packets depend on it.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let players = ctx.players.all();
        let a_rating = players.iter().find(|p| p.name() == "a").unwrap().rating();
        let b_rating = players.iter().find(|p| p.name() == "b").unwrap().rating();
        assert_eq!(a_rating, 1516);
        assert_eq!(b_rating, 1484);
    }

    #[tokio::test]
    async fn s4_logout_cascades_as_resignation() {
        let ctx = Arc::new(ServerContext::new(8));
        let mut a = spawn_client(&ctx);
        let mut b = spawn_client(&ctx);
        let (_a_inv_id, b_inv_id) = set_up_accepted_game(&mut a, &mut b).await;

        drop(a.to_server);
        drop(a.from_server);

        let resigned = b.recv().await;
        assert_eq!(resigned.header.packet_type, protocol::RESIGNED);
        assert_eq!(resigned.header.id, b_inv_id);
    }

    #[tokio::test]
    async fn s5_registration_blocks_once_the_server_is_at_capacity() {
        let ctx = Arc::new(ServerContext::new(1));
        let mut a = spawn_client(&ctx);
        a.login("a").await;

        let (client_to_server, server_reads) = tokio::io::duplex(4096);
        let (server_writes, _client_from_server) = tokio::io::duplex(4096);
        let session = ClientSession::new(server_writes, Box::new(NullReadShutdown));
        let waiting_ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            waiting_ctx.registry.register(session.clone()).await
                && {
                    run(waiting_ctx, session, server_reads).await;
                    true
                }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(a.to_server);
        drop(a.from_server);
        drop(client_to_server);
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn s6_duplicate_login_is_rejected() {
        let ctx = Arc::new(ServerContext::new(8));
        let mut a = spawn_client(&ctx);
        a.login("a").await;
        a.send(Header::new(protocol::LOGIN, 0, GameRole::None, 1), b"a").await;
        let reply = a.recv().await;
        assert_eq!(reply.header.packet_type, protocol::NACK);
    }

    #[tokio::test]
    async fn invite_with_role_none_is_nacked_not_a_crash() {
        let ctx = Arc::new(ServerContext::new(8));
        let mut a = spawn_client(&ctx);
        let mut b = spawn_client(&ctx);
        a.login("a").await;
        b.login("b").await;

        a.send(Header::new(protocol::INVITE, 0, GameRole::None, 1), b"b").await;
        let reply = a.recv().await;
        assert_eq!(reply.header.packet_type, protocol::NACK);

        // The session is still alive and usable afterwards.
        a.send(Header::empty(protocol::USERS, 0, GameRole::None), &[]).await;
        let users = a.recv().await;
        assert_eq!(users.header.packet_type, protocol::ACK);
    }
}
