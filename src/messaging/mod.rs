//! Request / response messaging for the chat protocol on top of plain UDP datagrams.
//!
//! Every datagram carries exactly one message in a fixed binary layout (all numbers in network
//!  byte order):
//!
//! ```ascii
//! 0: message kind (u16)
//! 2: sequence number (u32) - correlates a response with its request
//! 6: body, fixed width per kind:
//!    * HEARTBEAT_REQUEST / _RESPONSE: "HeartbeatReq" / "HeartbeatRsp", NUL padded to 15 bytes
//!    * LOGIN_REQUEST / LOGOUT_REQUEST: nick name, NUL padded to 30 bytes
//!    * LOGIN_RESPONSE / LOGOUT_RESPONSE: result (u8 0 / 1), reason NUL padded to 10 bytes
//!    * CHAT: recipient nick name (30 bytes) + content (1024 bytes), both NUL padded
//!    * BROADCAST: sender id (u32), recipient id (u32)
//! ```
//!
//! Requests that have a response kind (heartbeat, login, logout) are tracked by the
//!  [delivery::DeliveryManager] and retransmitted on every tick until the response arrives or the
//!  retry budget is used up. Chat and broadcast messages are sent once.
//!
//! [end_point::EndPoint] ties it all together: it owns the socket, the pending requests and the
//!  application's [dispatcher::MessageHandler], and runs them in a single loop.

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod end_point;
pub mod error;
pub mod message;
pub mod message_kind;
pub mod transport;
