//! Control-channel commands and requests, status-byte mapping, and push frames.
//!
//! Field order is fixed by the protocol and has no version field, so both
//! sides must go through these types to stay byte-compatible.

use crate::codec::{read_number, read_string, FrameBuilder};
use crate::error::{DomainError, MsgrError, MsgrResult};
use std::fmt;
use tokio::io::AsyncBufRead;

/// Status byte for success on every command.
pub const STATUS_OK: u8 = 0;

/// Push tag for a delivered message.
pub const SEND_MESSAGE_TAG: &str = "SEND_MESSAGE";

/// Push tag for a sender acknowledgement.
pub const SEND_MESS_ACK_TAG: &str = "SEND_MESS_ACK";

/// Control-channel command names as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Register,
    Unregister,
    Connect,
    Disconnect,
    Send,
    /// Present in the command set but never transmitted.
    SendAttach,
    ConnectedUsers,
}

/// How a status byte reads for a given command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Ok,
    Rejected(DomainError),
    Failed(u8),
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Register,
        Command::Unregister,
        Command::Connect,
        Command::Disconnect,
        Command::Send,
        Command::SendAttach,
        Command::ConnectedUsers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Register => "REGISTER",
            Command::Unregister => "UNREGISTER",
            Command::Connect => "CONNECT",
            Command::Disconnect => "DISCONNECT",
            Command::Send => "SEND",
            Command::SendAttach => "SENDATTACH",
            Command::ConnectedUsers => "CONNECTEDUSERS",
        }
    }

    pub fn from_wire(s: &str) -> Option<Command> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// Domain codes this command defines, besides `0`.
    fn domain_codes(self) -> &'static [(u8, DomainError)] {
        match self {
            Command::Register => &[(1, DomainError::AliasInUse)],
            Command::Unregister => &[(1, DomainError::AliasNotFound)],
            Command::Connect => &[
                (1, DomainError::AliasNotFound),
                (2, DomainError::AlreadyConnected),
            ],
            Command::Disconnect => &[
                (1, DomainError::AliasNotFound),
                (2, DomainError::NotConnected),
            ],
            Command::Send => &[(1, DomainError::AliasNotFound)],
            Command::ConnectedUsers => &[(1, DomainError::NotConnected)],
            Command::SendAttach => &[],
        }
    }

    /// The generic failure byte the server uses for this command.
    ///
    /// CONNECT and DISCONNECT use `2` as a domain code, so their failure is `3`.
    pub fn failure_code(self) -> u8 {
        match self {
            Command::Connect | Command::Disconnect => 3,
            _ => 2,
        }
    }

    pub fn decode_status(self, code: u8) -> StatusOutcome {
        if code == STATUS_OK {
            return StatusOutcome::Ok;
        }
        self.domain_codes()
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, d)| StatusOutcome::Rejected(*d))
            .unwrap_or(StatusOutcome::Failed(code))
    }

    /// Status byte for `err`, or the failure code if this command has no code for it.
    pub fn encode_rejection(self, err: DomainError) -> u8 {
        self.domain_codes()
            .iter()
            .find(|(_, d)| *d == err)
            .map(|(c, _)| *c)
            .unwrap_or_else(|| self.failure_code())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One client request, as framed on a control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Register {
        username: String,
        alias: String,
        date_of_birth: String,
    },
    Unregister {
        alias: String,
    },
    Connect {
        alias: String,
        push_port: u16,
    },
    Disconnect {
        alias: String,
    },
    Send {
        sender: String,
        recipient: String,
        body: String,
    },
    ConnectedUsers {
        alias: String,
    },
}

impl ControlRequest {
    pub fn command(&self) -> Command {
        match self {
            ControlRequest::Register { .. } => Command::Register,
            ControlRequest::Unregister { .. } => Command::Unregister,
            ControlRequest::Connect { .. } => Command::Connect,
            ControlRequest::Disconnect { .. } => Command::Disconnect,
            ControlRequest::Send { .. } => Command::Send,
            ControlRequest::ConnectedUsers { .. } => Command::ConnectedUsers,
        }
    }

    /// The alias acting in this request (the sender for SEND).
    pub fn alias(&self) -> &str {
        match self {
            ControlRequest::Register { alias, .. }
            | ControlRequest::Unregister { alias }
            | ControlRequest::Connect { alias, .. }
            | ControlRequest::Disconnect { alias }
            | ControlRequest::ConnectedUsers { alias } => alias,
            ControlRequest::Send { sender, .. } => sender,
        }
    }

    pub fn encode(&self) -> MsgrResult<Vec<u8>> {
        let frame = FrameBuilder::new().string(self.command().as_str())?;
        let frame = match self {
            ControlRequest::Register {
                username,
                alias,
                date_of_birth,
            } => frame.string(username)?.string(alias)?.string(date_of_birth)?,
            ControlRequest::Unregister { alias }
            | ControlRequest::Disconnect { alias }
            | ControlRequest::ConnectedUsers { alias } => frame.string(alias)?,
            ControlRequest::Connect { alias, push_port } => {
                frame.string(alias)?.number(u64::from(*push_port))
            }
            ControlRequest::Send {
                sender,
                recipient,
                body,
            } => frame.string(sender)?.string(recipient)?.string(body)?,
        };
        Ok(frame.into_bytes())
    }

    /// Read the fields following an already-read command name.
    pub async fn read_body<R: AsyncBufRead + Unpin>(
        command: Command,
        reader: &mut R,
    ) -> MsgrResult<Self> {
        let request = match command {
            Command::Register => ControlRequest::Register {
                username: read_string(reader).await?,
                alias: read_string(reader).await?,
                date_of_birth: read_string(reader).await?,
            },
            Command::Unregister => ControlRequest::Unregister {
                alias: read_string(reader).await?,
            },
            Command::Connect => {
                let alias = read_string(reader).await?;
                let port = read_number(reader).await?;
                let push_port = u16::try_from(port)
                    .map_err(|_| MsgrError::Framing(format!("push port out of range: {port}")))?;
                ControlRequest::Connect { alias, push_port }
            }
            Command::Disconnect => ControlRequest::Disconnect {
                alias: read_string(reader).await?,
            },
            Command::Send => ControlRequest::Send {
                sender: read_string(reader).await?,
                recipient: read_string(reader).await?,
                body: read_string(reader).await?,
            },
            Command::ConnectedUsers => ControlRequest::ConnectedUsers {
                alias: read_string(reader).await?,
            },
            Command::SendAttach => return Err(MsgrError::Unimplemented("SENDATTACH")),
        };
        Ok(request)
    }

    /// Read a full request, command name first.
    pub async fn read_from<R: AsyncBufRead + Unpin>(reader: &mut R) -> MsgrResult<Self> {
        let name = read_string(reader).await?;
        let command = Command::from_wire(&name)
            .ok_or_else(|| MsgrError::Framing(format!("unknown command: {name}")))?;
        Self::read_body(command, reader).await
    }
}

/// A server-initiated notification delivered over the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Message { source: String, id: u64, body: String },
    Ack { id: u64 },
}

impl PushEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            PushEvent::Message { .. } => SEND_MESSAGE_TAG,
            PushEvent::Ack { .. } => SEND_MESS_ACK_TAG,
        }
    }

    pub fn encode(&self) -> MsgrResult<Vec<u8>> {
        let frame = FrameBuilder::new().string(self.tag())?;
        let frame = match self {
            PushEvent::Message { source, id, body } => {
                frame.string(source)?.number(*id).string(body)?
            }
            PushEvent::Ack { id } => frame.number(*id),
        };
        Ok(frame.into_bytes())
    }

    /// Read one push frame. Unknown tags yield `Ok(None)`.
    pub async fn read_from<R: AsyncBufRead + Unpin>(reader: &mut R) -> MsgrResult<Option<Self>> {
        let tag = read_string(reader).await?;
        let event = match tag.as_str() {
            SEND_MESSAGE_TAG => PushEvent::Message {
                source: read_string(reader).await?,
                id: read_number(reader).await?,
                body: read_string(reader).await?,
            },
            SEND_MESS_ACK_TAG => PushEvent::Ack {
                id: read_number(reader).await?,
            },
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

impl fmt::Display for PushEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushEvent::Message { source, id, body } => {
                write!(f, "message {id} from {source}: {body}")
            }
            PushEvent::Ack { id } => write!(f, "send {id} acknowledged"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names_parse_back() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_wire(cmd.as_str()), Some(cmd));
        }
        assert_eq!(Command::from_wire("register"), None);
        assert_eq!(Command::from_wire("SEND_MESSAGE"), None);
    }

    #[test]
    fn status_mapping_per_command() {
        use DomainError::*;

        assert_eq!(Command::Register.decode_status(0), StatusOutcome::Ok);
        assert_eq!(
            Command::Register.decode_status(1),
            StatusOutcome::Rejected(AliasInUse)
        );
        assert_eq!(Command::Register.decode_status(2), StatusOutcome::Failed(2));

        assert_eq!(
            Command::Connect.decode_status(2),
            StatusOutcome::Rejected(AlreadyConnected)
        );
        assert_eq!(Command::Connect.decode_status(3), StatusOutcome::Failed(3));
        assert_eq!(
            Command::Disconnect.decode_status(2),
            StatusOutcome::Rejected(NotConnected)
        );
        assert_eq!(
            Command::ConnectedUsers.decode_status(1),
            StatusOutcome::Rejected(NotConnected)
        );
        assert_eq!(Command::Send.decode_status(255), StatusOutcome::Failed(255));
    }

    #[test]
    fn rejection_without_code_falls_back_to_failure() {
        assert_eq!(Command::Send.encode_rejection(DomainError::AliasNotFound), 1);
        assert_eq!(Command::Send.encode_rejection(DomainError::NotConnected), 2);
        assert_eq!(Command::Connect.encode_rejection(DomainError::NotConnected), 3);
        assert_eq!(
            Command::Disconnect.encode_rejection(DomainError::NotConnected),
            2
        );
    }

    #[test]
    fn connect_request_layout() {
        let req = ControlRequest::Connect {
            alias: "bob".into(),
            push_port: 40000,
        };
        assert_eq!(req.encode().unwrap(), b"CONNECT\0bob\x0040000\0".to_vec());
    }

    #[tokio::test]
    async fn register_request_reads_back() {
        let req = ControlRequest::Register {
            username: "Bob Builder".into(),
            alias: "bob".into(),
            date_of_birth: "01/01/2000".into(),
        };
        let wire = req.encode().unwrap();
        let mut reader: &[u8] = &wire;
        assert_eq!(ControlRequest::read_from(&mut reader).await.unwrap(), req);
    }

    #[tokio::test]
    async fn connect_port_out_of_range_is_framing_error() {
        let mut reader: &[u8] = b"CONNECT\0bob\x0070000\0";
        let err = ControlRequest::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, MsgrError::Framing(_)));
    }

    #[tokio::test]
    async fn sendattach_body_is_unimplemented() {
        let mut reader: &[u8] = b"SENDATTACH\0bob\0hi\0/tmp/x\0";
        let err = ControlRequest::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, MsgrError::Unimplemented(_)));
    }

    #[tokio::test]
    async fn push_message_frame_reads_back() {
        let event = PushEvent::Message {
            source: "alice".into(),
            id: 12,
            body: "hi bob".into(),
        };
        let wire = event.encode().unwrap();
        assert_eq!(wire, b"SEND_MESSAGE\0alice\x0012\0hi bob\0".to_vec());

        let mut reader: &[u8] = &wire;
        assert_eq!(PushEvent::read_from(&mut reader).await.unwrap(), Some(event));
    }

    #[tokio::test]
    async fn unknown_push_tag_is_ignored() {
        let mut reader: &[u8] = b"SEND_FILE\0whatever\0";
        assert_eq!(PushEvent::read_from(&mut reader).await.unwrap(), None);
    }

    #[test]
    fn push_events_render_status_lines() {
        let msg = PushEvent::Message {
            source: "alice".into(),
            id: 3,
            body: "hi bob".into(),
        };
        assert_eq!(msg.to_string(), "message 3 from alice: hi bob");
        assert_eq!(PushEvent::Ack { id: 3 }.to_string(), "send 3 acknowledged");
    }
}
