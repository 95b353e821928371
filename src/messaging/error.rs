use std::net::SocketAddr;

use thiserror::Error;

use crate::messaging::message_kind::MessageKind;


/// Everything that can go wrong with a single message. None of these is fatal: the end point logs
///  them and carries on with the next datagram / tick.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum MessagingError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("field '{field}' is {actual} bytes long, the wire format allows at most {max}")]
    FieldTooLong { field: &'static str, max: usize, actual: usize },

    #[error("unknown message kind {0}")]
    UnknownMessageKind(u16),

    #[error("response #{sequence_number} from {from:?} does not match any pending request")]
    SpuriousResponse { from: SocketAddr, sequence_number: u32 },

    #[error("request #{sequence_number} to {to:?} was not answered after {retries} retransmissions")]
    DeliveryTimeout { to: SocketAddr, sequence_number: u32, retries: u32 },

    #[error("{0:?} messages have no response kind and cannot be tracked for delivery")]
    NotCorrelatable(MessageKind),

    #[error("the end point is closed")]
    EndPointClosed,
}

impl MessagingError {
    pub fn malformed(msg: impl Into<String>) -> MessagingError {
        MessagingError::MalformedMessage(msg.into())
    }
}
