use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};

use crate::messaging::error::MessagingError;
use crate::messaging::message::Message;
use crate::messaging::transport::Transport;


/// Identifies a request for the purpose of matching it with its response: the peer it was sent
///  to, and its sequence number. The same sequence number may be in flight to several peers at
///  the same time.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CorrelationKey {
    pub peer: SocketAddr,
    pub sequence_number: u32,
}
impl Debug for CorrelationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[#{}@{:?}]", self.sequence_number, self.peer)
    }
}

struct PendingRequest {
    request: Message,
    /// retransmissions send these bytes verbatim
    encoded: Bytes,
    retry_count: u32,
}

/// A request that exhausted its retry budget without being answered
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeliveryTimeout {
    pub request: Message,
    pub to: SocketAddr,
    pub retries: u32,
}
impl DeliveryTimeout {
    pub fn as_error(&self) -> MessagingError {
        MessagingError::DeliveryTimeout {
            to: self.to,
            sequence_number: self.request.sequence_number,
            retries: self.retries,
        }
    }
}


/// Keeps track of requests that were sent but not answered yet, retransmitting them on every
///  tick until either a matching response arrives or the retry budget is exhausted.
///
/// There is at most one pending request per [CorrelationKey]. Sending a request for a key that
///  is still pending replaces the earlier request, resetting its retry count.
///
/// This is single-owner state without internal synchronization: all calls are expected to come
///  from the end point's loop.
pub struct DeliveryManager {
    max_retry_times: u32,
    transport: Arc<dyn Transport>,
    pending: FxHashMap<CorrelationKey, PendingRequest>,
    abandoned: bool,
}

impl DeliveryManager {
    pub fn new(max_retry_times: u32, transport: Arc<dyn Transport>) -> DeliveryManager {
        DeliveryManager {
            max_retry_times,
            transport,
            pending: FxHashMap::default(),
            abandoned: false,
        }
    }

    pub fn send_request(&mut self, request: Message, to: SocketAddr) -> Result<(), MessagingError> {
        if !request.kind().expects_response() {
            return Err(MessagingError::NotCorrelatable(request.kind()));
        }
        if self.abandoned {
            return Err(MessagingError::EndPointClosed);
        }

        let encoded = request.encode()?;

        let key = CorrelationKey {
            peer: to,
            sequence_number: request.sequence_number,
        };
        debug!("sending {:?} request {:?}", request.kind(), key);

        self.transport.send(to, &encoded);

        let previous = self.pending.insert(key, PendingRequest {
            request,
            encoded,
            retry_count: 0,
        });
        if let Some(previous) = previous {
            debug!("request {:?} replaces pending {:?} request after {} retransmissions", key, previous.request.kind(), previous.retry_count);
        }
        Ok(())
    }

    /// Matches a response against the pending requests, returning the request it answers. A
    ///  response of the wrong kind (e.g. a heartbeat response for a pending login request) does
    ///  not match, and the request stays pending.
    pub fn on_response_received(&mut self, response: &Message, from: SocketAddr) -> Result<Message, MessagingError> {
        let key = CorrelationKey {
            peer: from,
            sequence_number: response.sequence_number,
        };
        let spurious = MessagingError::SpuriousResponse {
            from,
            sequence_number: response.sequence_number,
        };

        let Some(pending) = self.pending.get(&key) else {
            return Err(spurious);
        };
        if pending.request.kind().response_kind() != Some(response.kind()) {
            debug!("{:?} does not answer pending {:?} request {:?}", response.kind(), pending.request.kind(), key);
            return Err(spurious);
        }

        match self.pending.remove(&key) {
            Some(pending) => {
                debug!("{:?} acknowledges {:?} request {:?} after {} retransmissions", response.kind(), pending.request.kind(), key, pending.retry_count);
                Ok(pending.request)
            }
            None => Err(spurious),
        }
    }

    /// Called once per retry interval: every pending request is retransmitted once, and those that
    ///  reached the retry limit are removed and returned. The last retransmission and the timeout
    ///  happen in the same tick, so a request never outlives `max_retry_times` ticks.
    pub fn on_tick(&mut self) -> Vec<DeliveryTimeout> {
        if self.abandoned {
            return Vec::new();
        }

        trace!("tick with {} pending requests", self.pending.len());

        let mut exhausted = Vec::new();
        for (key, pending) in self.pending.iter_mut() {
            if pending.retry_count < self.max_retry_times {
                pending.retry_count += 1;
                debug!("retransmitting {:?} request {:?} ({} of {})", pending.request.kind(), key, pending.retry_count, self.max_retry_times);
                self.transport.send(key.peer, &pending.encoded);
            }
            if pending.retry_count >= self.max_retry_times {
                exhausted.push(*key);
            }
        }
        exhausted.sort();

        exhausted.into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|pending| (key, pending)))
            .map(|(key, pending)| {
                warn!("giving up on {:?} request {:?} after {} retransmissions", pending.request.kind(), key, pending.retry_count);
                DeliveryTimeout {
                    request: pending.request,
                    to: key.peer,
                    retries: pending.retry_count,
                }
            })
            .collect()
    }

    /// Drops all pending requests without reporting them, and turns all further calls into
    ///  no-ops. This is part of closing the end point.
    pub fn abandon_all(&mut self) {
        if !self.pending.is_empty() {
            info!("abandoning {} pending requests", self.pending.len());
        }
        self.pending.clear();
        self.abandoned = true;
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn retry_count(&self, key: &CorrelationKey) -> Option<u32> {
        self.pending.get(key)
            .map(|p| p.retry_count)
    }
}
