use num_enum::{IntoPrimitive, TryFromPrimitive};


/// The numeric tag at the start of every datagram, identifying both the message's meaning and its
///  wire layout.
///
/// NB: 0 is deliberately not a valid kind - a zeroed buffer must never decode to a message
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum MessageKind {
    HeartbeatRequest = 1,
    HeartbeatResponse = 2,
    LoginRequest = 3,
    LoginResponse = 4,
    LogoutRequest = 5,
    LogoutResponse = 6,
    Chat = 7,
    Broadcast = 8,
}

impl MessageKind {
    pub const ALL: [MessageKind; 8] = [
        MessageKind::HeartbeatRequest,
        MessageKind::HeartbeatResponse,
        MessageKind::LoginRequest,
        MessageKind::LoginResponse,
        MessageKind::LogoutRequest,
        MessageKind::LogoutResponse,
        MessageKind::Chat,
        MessageKind::Broadcast,
    ];

    pub const HEARTBEAT_TAG_LEN: usize = 15;
    pub const NAME_LEN: usize = 30;
    pub const REASON_LEN: usize = 10;
    pub const CHAT_CONTENT_LEN: usize = 1024;

    pub fn from_wire(tag: u16) -> Option<MessageKind> {
        MessageKind::try_from(tag).ok()
    }

    pub fn to_wire(self) -> u16 {
        self.into()
    }

    pub fn is_response(self) -> bool {
        matches!(self, MessageKind::HeartbeatResponse | MessageKind::LoginResponse | MessageKind::LogoutResponse)
    }

    pub fn is_request(self) -> bool {
        !self.is_response()
    }

    /// The kind of response a peer answers this kind of request with, or `None` for kinds that
    ///  are sent without expecting an answer (and are therefore not retransmitted)
    pub fn response_kind(self) -> Option<MessageKind> {
        match self {
            MessageKind::HeartbeatRequest => Some(MessageKind::HeartbeatResponse),
            MessageKind::LoginRequest => Some(MessageKind::LoginResponse),
            MessageKind::LogoutRequest => Some(MessageKind::LogoutResponse),
            _ => None,
        }
    }

    pub fn expects_response(self) -> bool {
        self.response_kind().is_some()
    }

    /// fixed length of this kind's body, i.e. excluding the header
    pub fn body_len(self) -> usize {
        match self {
            MessageKind::HeartbeatRequest | MessageKind::HeartbeatResponse => Self::HEARTBEAT_TAG_LEN,
            MessageKind::LoginRequest | MessageKind::LogoutRequest => Self::NAME_LEN,
            MessageKind::LoginResponse | MessageKind::LogoutResponse => 1 + Self::REASON_LEN,
            MessageKind::Chat => Self::NAME_LEN + Self::CHAT_CONTENT_LEN,
            MessageKind::Broadcast => 2 * size_of::<u32>(),
        }
    }

    /// total number of bytes a message of this kind occupies on the wire
    pub fn wire_len(self) -> usize {
        crate::messaging::message::MessageHeader::SERIALIZED_LEN + self.body_len()
    }

    pub fn max_wire_len() -> usize {
        Self::ALL.iter()
            .map(|k| k.wire_len())
            .max()
            .unwrap_or_default()
    }
}
