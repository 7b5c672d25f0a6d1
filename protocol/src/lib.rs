//! The wire protocol between a tic-tac-toe client and the game server: a
//! fixed 16-byte header followed by an optional payload, all multi-byte
//! fields in network byte order.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size in bytes of the fixed header that precedes every packet.
pub const HEADER_SIZE: usize = 16;

// Client -> Server

/// Claim a username for this connection. Payload: the username, not NUL-terminated.
pub const LOGIN: u8 = 1;
/// Ask for the list of currently logged-in users. No payload.
pub const USERS: u8 = 2;
/// Invite another logged-in user to play. Payload: the target's username.
pub const INVITE: u8 = 3;
/// Withdraw an invitation this session is the source of.
pub const REVOKE: u8 = 4;
/// Accept an invitation this session is the target of.
pub const ACCEPT: u8 = 5;
/// Decline an invitation this session is the target of.
pub const DECLINE: u8 = 6;
/// Make a move in an accepted invitation's game. Payload: the move string.
pub const MOVE: u8 = 7;
/// Resign from an accepted invitation's game.
pub const RESIGN: u8 = 8;

// Server -> Client

/// Acknowledge the previous request succeeded.
pub const ACK: u8 = 9;
/// Reject the previous request.
pub const NACK: u8 = 10;
/// Notify the target of a new invitation. Payload: the source's username.
pub const INVITED: u8 = 11;
/// Notify the target that the source revoked an invitation.
pub const REVOKED: u8 = 12;
/// Notify the source that the target accepted. Payload: initial board iff source is FIRST.
pub const ACCEPTED: u8 = 13;
/// Notify the source that the target declined.
pub const DECLINED: u8 = 14;
/// Notify the opponent of a move. Payload: the rendered board.
pub const MOVED: u8 = 15;
/// Notify the opponent of a resignation.
pub const RESIGNED: u8 = 16;
/// Notify both participants that the game has terminated. Role = winner.
pub const ENDED: u8 = 17;

/// Which side of a game a participant plays, or the absence of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GameRole {
    None = 0,
    First = 1,
    Second = 2,
}

impl GameRole {
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(GameRole::None),
            1 => Ok(GameRole::First),
            2 => Ok(GameRole::Second),
            other => Err(ProtocolError::InvalidRole(other)),
        }
    }

    /// The other playing role. Panics if called on `None`.
    pub fn other(self) -> GameRole {
        match self {
            GameRole::First => GameRole::Second,
            GameRole::Second => GameRole::First,
            GameRole::None => panic!("GameRole::None has no opponent"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed before a header could be read")]
    Eof,
    #[error("connection closed mid-payload")]
    TruncatedPayload,
    #[error("invalid role byte {0}")]
    InvalidRole(u8),
    #[error("payload length {actual} does not match header size {expected}")]
    SizeMismatch { expected: u16, actual: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The fixed 16-byte header that precedes every packet.
#[derive(Debug, Clone)]
pub struct Header {
    pub packet_type: u8,
    /// Invitation id, meaning dependent on packet type and direction.
    pub id: u8,
    pub role: GameRole,
    pub size: u16,
    pub sec: u32,
    pub nsec: u32,
}

impl Header {
    /// Build a header stamped with the current time, for `packet_type` carrying
    /// a payload of `size` bytes.
    pub fn new(packet_type: u8, id: u8, role: GameRole, size: u16) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Header {
            packet_type,
            id,
            role,
            size,
            sec: now.as_secs() as u32,
            nsec: now.subsec_nanos(),
        }
    }

    /// A header for a reply carrying no payload.
    pub fn empty(packet_type: u8, id: u8, role: GameRole) -> Self {
        Header::new(packet_type, id, role, 0)
    }
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// Write `header` followed by `payload` in full. Partial writes are looped
/// internally by `write_all`; fails if `header.size` and `payload.len()` disagree.
pub async fn send<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &Header,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    if header.size as usize != payload.len() {
        return Err(ProtocolError::SizeMismatch {
            expected: header.size,
            actual: payload.len(),
        });
    }
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(header.packet_type);
    buf.put_u8(header.id);
    buf.put_u8(header.role as u8);
    buf.put_u8(0); // pad
    buf.put_u16(header.size);
    buf.put_u32(header.sec);
    buf.put_u32(header.nsec);
    buf.put_slice(payload);
    writer.write_all(&buf).await?;
    Ok(())
}

/// Read one packet. End-of-stream while reading the header is reported as
/// `ProtocolError::Eof`, the normal signal that the peer closed the connection;
/// end-of-stream while reading the payload is `ProtocolError::TruncatedPayload`.
///
/// The full header (including `size`) is parsed, and `size` bytes of payload
/// are always drained from the stream, before the role byte is validated —
/// so a malformed role leaves the stream correctly framed for the next read
/// instead of losing synchronization on whatever payload was already in flight.
pub async fn recv<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, ProtocolError> {
    let mut hdr_buf = [0u8; HEADER_SIZE];
    if let Err(e) = reader.read_exact(&mut hdr_buf).await {
        return Err(match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ProtocolError::Eof,
            _ => ProtocolError::Io(e),
        });
    }
    let mut buf = &hdr_buf[..];
    let packet_type = buf.get_u8();
    let id = buf.get_u8();
    let role_byte = buf.get_u8();
    let _pad = buf.get_u8();
    let size = buf.get_u16();
    let sec = buf.get_u32();
    let nsec = buf.get_u32();

    let mut payload = vec![0u8; size as usize];
    if size > 0 {
        if let Err(e) = reader.read_exact(&mut payload).await {
            return Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => ProtocolError::TruncatedPayload,
                _ => ProtocolError::Io(e),
            });
        }
    }

    let role = GameRole::from_u8(role_byte)?;
    Ok(Packet {
        header: Header {
            packet_type,
            id,
            role,
            size,
            sec,
            nsec,
        },
        payload,
    })
}
