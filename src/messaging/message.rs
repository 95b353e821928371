use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::messaging::error::MessagingError;
use crate::messaging::message_kind::MessageKind;
use crate::util::buf::{check_fixed_str, put_fixed_str, BufExt};


pub const HEARTBEAT_REQUEST_TAG: &str = "HeartbeatReq";
pub const HEARTBEAT_RESPONSE_TAG: &str = "HeartbeatRsp";


/// The part that is common to all messages. It is enough to decide how to route a datagram
///  before decoding its body.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MessageHeader {
    pub kind_tag: u16,
    pub sequence_number: u32,
}
impl MessageHeader {
    pub const SERIALIZED_LEN: usize = size_of::<u16>() + size_of::<u32>();

    /// reads the header without consuming the buffer. The kind tag is returned raw so that an
    ///  unknown kind can be told apart from a truncated datagram.
    pub fn peek(buf: &[u8]) -> Result<MessageHeader, MessagingError> {
        let mut buf = buf;
        Ok(MessageHeader {
            kind_tag: buf.checked_get_u16("kind")?,
            sequence_number: buf.checked_get_u32("sequence_number")?,
        })
    }

    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_wire(self.kind_tag)
    }
}


#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NameData {
    pub name: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OutcomeData {
    pub result: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChatData {
    pub recipient: String,
    pub content: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BroadcastData {
    pub sender_id: u32,
    pub recipient_id: u32,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MessageBody {
    HeartbeatRequest,
    HeartbeatResponse,
    LoginRequest(NameData),
    LoginResponse(OutcomeData),
    LogoutRequest(NameData),
    LogoutResponse(OutcomeData),
    Chat(ChatData),
    Broadcast(BroadcastData),
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::HeartbeatRequest => MessageKind::HeartbeatRequest,
            MessageBody::HeartbeatResponse => MessageKind::HeartbeatResponse,
            MessageBody::LoginRequest(_) => MessageKind::LoginRequest,
            MessageBody::LoginResponse(_) => MessageKind::LoginResponse,
            MessageBody::LogoutRequest(_) => MessageKind::LogoutRequest,
            MessageBody::LogoutResponse(_) => MessageKind::LogoutResponse,
            MessageBody::Chat(_) => MessageKind::Chat,
            MessageBody::Broadcast(_) => MessageKind::Broadcast,
        }
    }
}


/// A decoded message. Messages are plain values: they are created once (by application code or
///  by decoding a datagram) and never changed afterwards.
///
/// Strings are carried in fixed-width NUL padded fields on the wire, and trailing NUL characters
///  are stripped on decoding. So a string ending in `'\0'` does not survive a round trip.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    pub sequence_number: u32,
    pub body: MessageBody,
}

impl Message {
    pub fn new(sequence_number: u32, body: MessageBody) -> Message {
        Message {
            sequence_number,
            body,
        }
    }

    pub fn heartbeat_request(sequence_number: u32) -> Message {
        Self::new(sequence_number, MessageBody::HeartbeatRequest)
    }

    pub fn heartbeat_response(sequence_number: u32) -> Message {
        Self::new(sequence_number, MessageBody::HeartbeatResponse)
    }

    pub fn login_request(sequence_number: u32, name: impl Into<String>) -> Message {
        Self::new(sequence_number, MessageBody::LoginRequest(NameData { name: name.into() }))
    }

    pub fn login_response(sequence_number: u32, result: bool, reason: impl Into<String>) -> Message {
        Self::new(sequence_number, MessageBody::LoginResponse(OutcomeData { result, reason: reason.into() }))
    }

    pub fn logout_request(sequence_number: u32, name: impl Into<String>) -> Message {
        Self::new(sequence_number, MessageBody::LogoutRequest(NameData { name: name.into() }))
    }

    pub fn logout_response(sequence_number: u32, result: bool, reason: impl Into<String>) -> Message {
        Self::new(sequence_number, MessageBody::LogoutResponse(OutcomeData { result, reason: reason.into() }))
    }

    pub fn chat(sequence_number: u32, recipient: impl Into<String>, content: impl Into<String>) -> Message {
        Self::new(sequence_number, MessageBody::Chat(ChatData { recipient: recipient.into(), content: content.into() }))
    }

    pub fn broadcast(sequence_number: u32, sender_id: u32, recipient_id: u32) -> Message {
        Self::new(sequence_number, MessageBody::Broadcast(BroadcastData { sender_id, recipient_id }))
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn encode(&self) -> Result<Bytes, MessagingError> {
        let mut buf = BytesMut::with_capacity(self.kind().wire_len());
        self.ser(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Writes the message's wire representation. Field widths are checked before anything is
    ///  written, so `buf` is left untouched if this returns an error.
    pub fn ser(&self, buf: &mut impl BufMut) -> Result<(), MessagingError> {
        self.check_field_widths()?;

        buf.put_u16(self.kind().to_wire());
        buf.put_u32(self.sequence_number);

        match &self.body {
            MessageBody::HeartbeatRequest => put_fixed_str(buf, HEARTBEAT_REQUEST_TAG, MessageKind::HEARTBEAT_TAG_LEN),
            MessageBody::HeartbeatResponse => put_fixed_str(buf, HEARTBEAT_RESPONSE_TAG, MessageKind::HEARTBEAT_TAG_LEN),
            MessageBody::LoginRequest(data) | MessageBody::LogoutRequest(data) => {
                put_fixed_str(buf, &data.name, MessageKind::NAME_LEN);
            }
            MessageBody::LoginResponse(data) | MessageBody::LogoutResponse(data) => {
                buf.put_u8(data.result.into());
                put_fixed_str(buf, &data.reason, MessageKind::REASON_LEN);
            }
            MessageBody::Chat(data) => {
                put_fixed_str(buf, &data.recipient, MessageKind::NAME_LEN);
                put_fixed_str(buf, &data.content, MessageKind::CHAT_CONTENT_LEN);
            }
            MessageBody::Broadcast(data) => {
                buf.put_u32(data.sender_id);
                buf.put_u32(data.recipient_id);
            }
        }
        Ok(())
    }

    fn check_field_widths(&self) -> Result<(), MessagingError> {
        match &self.body {
            MessageBody::HeartbeatRequest | MessageBody::HeartbeatResponse | MessageBody::Broadcast(_) => Ok(()),
            MessageBody::LoginRequest(data) | MessageBody::LogoutRequest(data) => {
                check_fixed_str("name", &data.name, MessageKind::NAME_LEN)
            }
            MessageBody::LoginResponse(data) | MessageBody::LogoutResponse(data) => {
                check_fixed_str("reason", &data.reason, MessageKind::REASON_LEN)
            }
            MessageBody::Chat(data) => {
                check_fixed_str("recipient", &data.recipient, MessageKind::NAME_LEN)?;
                check_fixed_str("content", &data.content, MessageKind::CHAT_CONTENT_LEN)
            }
        }
    }

    /// Decodes exactly one message. The buffer must have exactly the kind's wire length: a
    ///  shorter buffer is truncated, and trailing garbage means the sender uses a layout we don't
    ///  understand - both are rejected rather than guessed at.
    pub fn decode(buf: &[u8]) -> Result<Message, MessagingError> {
        let header = MessageHeader::peek(buf)?;
        let kind = header.kind()
            .ok_or_else(|| MessagingError::malformed(format!("unknown message kind {}", header.kind_tag)))?;

        if buf.len() != kind.wire_len() {
            return Err(MessagingError::malformed(format!(
                "{:?} message must be {} bytes long, was {}", kind, kind.wire_len(), buf.len()
            )));
        }

        let mut body_buf = &buf[MessageHeader::SERIALIZED_LEN..];
        let body = Self::deser_body(kind, &mut body_buf)?;
        debug_assert!(!body_buf.has_remaining());

        Ok(Message {
            sequence_number: header.sequence_number,
            body,
        })
    }

    fn deser_body(kind: MessageKind, buf: &mut impl Buf) -> Result<MessageBody, MessagingError> {
        let body = match kind {
            MessageKind::HeartbeatRequest => {
                Self::deser_heartbeat_tag(buf, HEARTBEAT_REQUEST_TAG)?;
                MessageBody::HeartbeatRequest
            }
            MessageKind::HeartbeatResponse => {
                Self::deser_heartbeat_tag(buf, HEARTBEAT_RESPONSE_TAG)?;
                MessageBody::HeartbeatResponse
            }
            MessageKind::LoginRequest => MessageBody::LoginRequest(Self::deser_name(buf)?),
            MessageKind::LoginResponse => MessageBody::LoginResponse(Self::deser_outcome(buf)?),
            MessageKind::LogoutRequest => MessageBody::LogoutRequest(Self::deser_name(buf)?),
            MessageKind::LogoutResponse => MessageBody::LogoutResponse(Self::deser_outcome(buf)?),
            MessageKind::Chat => MessageBody::Chat(ChatData {
                recipient: buf.checked_get_fixed_str("recipient", MessageKind::NAME_LEN)?,
                content: buf.checked_get_fixed_str("content", MessageKind::CHAT_CONTENT_LEN)?,
            }),
            MessageKind::Broadcast => MessageBody::Broadcast(BroadcastData {
                sender_id: buf.checked_get_u32("sender_id")?,
                recipient_id: buf.checked_get_u32("recipient_id")?,
            }),
        };
        Ok(body)
    }

    fn deser_heartbeat_tag(buf: &mut impl Buf, expected: &str) -> Result<(), MessagingError> {
        let tag = buf.checked_get_fixed_str("tag", MessageKind::HEARTBEAT_TAG_LEN)?;
        if tag != expected {
            return Err(MessagingError::malformed(format!("expected heartbeat tag {:?}, was {:?}", expected, tag)));
        }
        Ok(())
    }

    fn deser_name(buf: &mut impl Buf) -> Result<NameData, MessagingError> {
        Ok(NameData {
            name: buf.checked_get_fixed_str("name", MessageKind::NAME_LEN)?,
        })
    }

    fn deser_outcome(buf: &mut impl Buf) -> Result<OutcomeData, MessagingError> {
        let result = match buf.checked_get_u8("result")? {
            0 => false,
            1 => true,
            n => return Err(MessagingError::malformed(format!("invalid boolean result {}", n))),
        };
        Ok(OutcomeData {
            result,
            reason: buf.checked_get_fixed_str("reason", MessageKind::REASON_LEN)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    fn padded(prefix: &[u8], len: usize) -> Vec<u8> {
        let mut result = prefix.to_vec();
        result.resize(len, 0);
        result
    }

    #[rstest]
    #[case::heartbeat_request(Message::heartbeat_request(7), [b"\0\x01\0\0\0\x07".to_vec(), padded(b"HeartbeatReq", 15)].concat())]
    #[case::heartbeat_response(Message::heartbeat_response(0x01020304), [b"\0\x02\x01\x02\x03\x04".to_vec(), padded(b"HeartbeatRsp", 15)].concat())]
    #[case::login_request(Message::login_request(1, "alice"), [b"\0\x03\0\0\0\x01".to_vec(), padded(b"alice", 30)].concat())]
    #[case::login_response(Message::login_response(1, true, ""), [b"\0\x04\0\0\0\x01\x01".to_vec(), padded(b"", 10)].concat())]
    #[case::logout_request(Message::logout_request(9, "bob"), [b"\0\x05\0\0\0\x09".to_vec(), padded(b"bob", 30)].concat())]
    #[case::logout_response(Message::logout_response(9, false, "unknown"), [b"\0\x06\0\0\0\x09\0".to_vec(), padded(b"unknown", 10)].concat())]
    #[case::chat(Message::chat(3, "bob", "hi"), [b"\0\x07\0\0\0\x03".to_vec(), padded(b"bob", 30), padded(b"hi", 1024)].concat())]
    #[case::broadcast(Message::broadcast(4, 5, 6), b"\0\x08\0\0\0\x04\0\0\0\x05\0\0\0\x06".to_vec())]
    fn test_encode(#[case] msg: Message, #[case] expected: Vec<u8>) {
        let encoded = msg.encode().unwrap();
        assert_eq!(encoded.as_ref(), expected.as_slice());
        assert_eq!(encoded.len(), msg.kind().wire_len());

        assert_eq!(Message::decode(&encoded).unwrap(), msg);
    }

    #[rstest]
    #[case::empty_strings(Message::chat(0, "", ""))]
    #[case::full_width_name(Message::login_request(u32::MAX, "a".repeat(30)))]
    #[case::full_width_content(Message::chat(17, "c".repeat(30), "x".repeat(1024)))]
    #[case::full_width_reason(Message::logout_response(2, true, "0123456789"))]
    #[case::multibyte(Message::chat(5, "zoë", "grüße 👋"))]
    #[case::inner_nul(Message::login_request(5, "a\0b"))]
    #[case::max_ids(Message::broadcast(u32::MAX, u32::MAX, 0))]
    fn test_round_trip_edge_values(#[case] msg: Message) {
        let encoded = msg.encode().unwrap();
        assert_eq!(Message::decode(&encoded).unwrap(), msg);
    }

    #[rstest]
    #[case::name(Message::login_request(1, "a".repeat(31)), "name", 30, 31)]
    #[case::logout_name(Message::logout_request(1, "ü".repeat(16)), "name", 30, 32)]
    #[case::reason(Message::login_response(1, false, "reason too long"), "reason", 10, 15)]
    #[case::recipient(Message::chat(1, "r".repeat(40), "hi"), "recipient", 30, 40)]
    #[case::content(Message::chat(1, "bob", "x".repeat(2000)), "content", 1024, 2000)]
    fn test_encode_field_too_long(#[case] msg: Message, #[case] field: &'static str, #[case] max: usize, #[case] actual: usize) {
        assert_eq!(msg.encode(), Err(MessagingError::FieldTooLong { field, max, actual }));

        let mut buf = BytesMut::new();
        assert!(msg.ser(&mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_every_truncation_is_malformed() {
        let messages = vec![
            Message::heartbeat_request(1),
            Message::heartbeat_response(1),
            Message::login_request(1, "alice"),
            Message::login_response(1, true, "ok"),
            Message::logout_request(1, "alice"),
            Message::logout_response(1, true, "ok"),
            Message::chat(1, "bob", "hello"),
            Message::broadcast(1, 2, 3),
        ];

        for msg in messages {
            let encoded = msg.encode().unwrap();
            for len in 0..encoded.len() {
                match Message::decode(&encoded[..len]) {
                    Err(MessagingError::MalformedMessage(_)) => {}
                    other => panic!("decoding {:?} truncated to {} bytes returned {:?}", msg.kind(), len, other),
                }
            }
        }
    }

    #[rstest]
    #[case::zero_kind(b"\0\0\0\0\0\x01".to_vec())]
    #[case::unknown_kind([b"\0\x09\0\0\0\x01".to_vec(), padded(b"", 30)].concat())]
    #[case::trailing_bytes([b"\0\x08\0\0\0\x01".to_vec(), padded(b"", 9)].concat())]
    #[case::wrong_heartbeat_tag([b"\0\x01\0\0\0\x01".to_vec(), padded(b"HeartbeatRsp", 15)].concat())]
    #[case::invalid_bool([b"\0\x04\0\0\0\x01\x02".to_vec(), padded(b"", 10)].concat())]
    #[case::invalid_utf8([b"\0\x03\0\0\0\x01\xff".to_vec(), padded(b"", 29)].concat())]
    fn test_decode_malformed(#[case] buf: Vec<u8>) {
        assert!(matches!(Message::decode(&buf), Err(MessagingError::MalformedMessage(_))));
    }

    #[rstest]
    #[case::complete(b"\0\x07\0\0\x01\0", Some(MessageHeader { kind_tag: 7, sequence_number: 256 }))]
    #[case::with_body(b"\x12\x34\0\0\0\x02abc", Some(MessageHeader { kind_tag: 0x1234, sequence_number: 2 }))]
    #[case::too_short(b"\0\x07\0\0\x01", None)]
    fn test_peek_header(#[case] buf: &[u8], #[case] expected: Option<MessageHeader>) {
        assert_eq!(MessageHeader::peek(buf).ok(), expected);
    }
}
