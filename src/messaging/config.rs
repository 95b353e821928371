use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;

use crate::messaging::message_kind::MessageKind;


#[derive(Debug, Clone)]
pub struct MessagingConfig {
    pub self_addr: SocketAddr,

    /// Pending requests are retransmitted once per interval. This is the fixed period of the
    ///  end point's tick; there is no backoff.
    pub retry_interval: Duration,

    /// A request that was retransmitted this many times without a response is given up on,
    ///  reporting a timeout to the application
    pub max_retry_times: u32,

    /// Size of the buffer datagrams are read into. Datagrams that are longer are truncated by the
    ///  OS and subsequently rejected as malformed.
    pub receive_buffer_size: usize,

    /// number of application requests (send / close) that can be queued for the end point's loop
    pub command_channel_capacity: usize,

    pub reuse_address: bool,
}

impl MessagingConfig {
    pub const DEFAULT_MAX_RETRY_TIMES: u32 = 3;

    pub fn new(self_addr: SocketAddr) -> MessagingConfig {
        MessagingConfig {
            self_addr,
            retry_interval: Duration::from_secs(1),
            max_retry_times: Self::DEFAULT_MAX_RETRY_TIMES,
            receive_buffer_size: 65536,
            command_channel_capacity: 1024,
            reuse_address: true,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry_interval.is_zero() {
            bail!("retry interval must be positive");
        }
        if self.receive_buffer_size < MessageKind::max_wire_len() {
            bail!("receive buffer size {} is too small for the biggest message ({} bytes)", self.receive_buffer_size, MessageKind::max_wire_len());
        }
        if self.command_channel_capacity == 0 {
            bail!("command channel capacity must be positive");
        }
        Ok(())
    }
}
