use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace, warn};


/// The byte-level side of messaging: sending and receiving raw datagrams without ever blocking
///  the caller.
///
/// NB: Sending is best effort - a datagram that can not be sent right now is dropped (and
///      logged). Retransmission of requests takes care of recovering from that.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn local_addr(&self) -> anyhow::Result<SocketAddr>;

    fn send(&self, to: SocketAddr, buf: &[u8]);

    /// Returns the next datagram if there is one, copying it into `buf`. Empty datagrams and
    ///  transient socket errors are logged and skipped. Returns `None` if nothing is ready or
    ///  the transport is closed.
    fn poll_receive(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)>;

    /// waits until there is (probably) something to receive
    async fn readable(&self) -> anyhow::Result<()>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}


pub struct UdpTransport {
    socket: UdpSocket,
    closed: AtomicBool,
}

impl UdpTransport {
    /// NB: This must be called from inside a tokio runtime
    pub fn bind(addr: SocketAddr, reuse_address: bool) -> anyhow::Result<UdpTransport> {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if reuse_address {
            socket.set_reuse_address(true)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let socket = UdpSocket::from_std(socket.into())?;
        info!("bound UDP socket to {:?}", socket.local_addr()?);

        Ok(UdpTransport {
            socket,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn send(&self, to: SocketAddr, buf: &[u8]) {
        if self.is_closed() {
            debug!("transport is closed - not sending datagram to {:?}", to);
            return;
        }

        trace!("sending datagram to {:?}: {:?}", to, buf);
        // tokio's try_send_to fails until the reactor saw the socket become writable, so the
        //  (non-blocking) syscall is issued directly
        match SockRef::from(&self.socket).send_to(buf, &to.into()) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                warn!("socket send buffer is full - dropping datagram to {:?}", to);
            }
            Err(e) => {
                error!("error sending datagram to {:?}: {}", to, e);
            }
        }
    }

    fn poll_receive(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        loop {
            if self.is_closed() {
                return None;
            }

            match self.socket.try_recv_from(buf) {
                Ok((0, from)) => {
                    debug!("received empty datagram from {:?} - ignoring", from);
                }
                Ok((len, from)) => {
                    trace!("received datagram from {:?}: {:?}", from, &buf[..len]);
                    return Some((len, from));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return None;
                }
                Err(e) => {
                    // e.g. ICMP 'port unreachable' for an earlier send, reported on the next read
                    warn!("error receiving from datagram socket: {}", e);
                }
            }
        }
    }

    async fn readable(&self) -> anyhow::Result<()> {
        self.socket.readable().await?;
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("closing UDP transport");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
