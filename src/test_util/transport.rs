use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::messaging::transport::Transport;


/// An in-memory [Transport]: datagrams are injected by the test, and sent datagrams are recorded
///  for inspection. Unlike a socket, it never receives anything the test did not put there.
#[derive(Debug)]
pub struct TrackingTransport {
    self_addr: SocketAddr,
    inbox: Mutex<VecDeque<(Vec<u8>, SocketAddr)>>,
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    inbox_notify: Notify,
    closed: AtomicBool,
}

impl TrackingTransport {
    pub fn new(self_addr: SocketAddr) -> Arc<TrackingTransport> {
        Arc::new(TrackingTransport {
            self_addr,
            inbox: Default::default(),
            sent: Default::default(),
            inbox_notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn inject(&self, buf: &[u8], from: SocketAddr) {
        lock(&self.inbox).push_back((buf.to_vec(), from));
        self.inbox_notify.notify_one();
    }

    pub fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        lock(&self.sent).clone()
    }

    pub fn take_sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut *lock(&self.sent))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock()
        .unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Transport for TrackingTransport {
    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.self_addr)
    }

    fn send(&self, to: SocketAddr, buf: &[u8]) {
        if !self.is_closed() {
            lock(&self.sent).push((to, buf.to_vec()));
        }
    }

    fn poll_receive(&self, buf: &mut [u8]) -> Option<(usize, SocketAddr)> {
        if self.is_closed() {
            return None;
        }

        let (datagram, from) = lock(&self.inbox).pop_front()?;
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Some((len, from))
    }

    async fn readable(&self) -> anyhow::Result<()> {
        loop {
            if !lock(&self.inbox).is_empty() {
                return Ok(());
            }
            self.inbox_notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
