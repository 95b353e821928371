use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::error;

use crate::messaging::dispatcher::{MessageHandler, MessageSender};
use crate::messaging::message::{BroadcastData, ChatData, Message, MessageBody, NameData, OutcomeData};


/// A handler callback, with the message reassembled from the callback's parameters
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum HandlerEvent {
    Request(Message, SocketAddr),
    Response(Message, SocketAddr),
    Timeout(Message, SocketAddr),
}

/// A [MessageHandler] that records all callbacks. Clones share the recorded events, so a test can
///  hand one clone to an end point and inspect the events through another.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<HandlerEvent>>>,
    answer_requests: bool,
}

impl RecordingHandler {
    /// a handler that additionally answers every login and logout request with success
    pub fn answering_requests() -> RecordingHandler {
        RecordingHandler {
            events: Default::default(),
            answer_requests: true,
        }
    }

    pub fn events(&self) -> Vec<HandlerEvent> {
        self.lock().clone()
    }

    pub fn take_events(&self) -> Vec<HandlerEvent> {
        std::mem::take(&mut *self.lock())
    }

    /// waits until at least `num_events` were recorded, or the timeout expired, returning all
    ///  events recorded so far
    pub async fn wait_for_events(&self, num_events: usize, timeout: Duration) -> Vec<HandlerEvent> {
        let deadline = Instant::now() + timeout;
        while self.lock().len() < num_events && Instant::now() < deadline {
            sleep(Duration::from_millis(5)).await;
        }
        self.events()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HandlerEvent>> {
        self.events.lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: HandlerEvent) {
        self.lock().push(event);
    }

    fn answer(&self, response: Message, to: SocketAddr, sender: &mut dyn MessageSender) {
        if self.answer_requests {
            if let Err(e) = sender.send(response, to) {
                error!("error answering request: {}", e);
            }
        }
    }
}

impl MessageHandler for RecordingHandler {
    fn handle_login_request(&mut self, sequence_number: u32, data: &NameData, from: SocketAddr, sender: &mut dyn MessageSender) {
        self.record(HandlerEvent::Request(Message::new(sequence_number, MessageBody::LoginRequest(data.clone())), from));
        self.answer(Message::login_response(sequence_number, true, ""), from, sender);
    }

    fn handle_logout_request(&mut self, sequence_number: u32, data: &NameData, from: SocketAddr, sender: &mut dyn MessageSender) {
        self.record(HandlerEvent::Request(Message::new(sequence_number, MessageBody::LogoutRequest(data.clone())), from));
        self.answer(Message::logout_response(sequence_number, true, ""), from, sender);
    }

    fn handle_chat(&mut self, sequence_number: u32, data: &ChatData, from: SocketAddr, _sender: &mut dyn MessageSender) {
        self.record(HandlerEvent::Request(Message::new(sequence_number, MessageBody::Chat(data.clone())), from));
    }

    fn handle_broadcast(&mut self, sequence_number: u32, data: &BroadcastData, from: SocketAddr, _sender: &mut dyn MessageSender) {
        self.record(HandlerEvent::Request(Message::new(sequence_number, MessageBody::Broadcast(data.clone())), from));
    }

    fn handle_heartbeat_response(&mut self, sequence_number: u32, from: SocketAddr, _sender: &mut dyn MessageSender) {
        self.record(HandlerEvent::Response(Message::heartbeat_response(sequence_number), from));
    }

    fn handle_login_response(&mut self, sequence_number: u32, data: &OutcomeData, from: SocketAddr, _sender: &mut dyn MessageSender) {
        self.record(HandlerEvent::Response(Message::new(sequence_number, MessageBody::LoginResponse(data.clone())), from));
    }

    fn handle_logout_response(&mut self, sequence_number: u32, data: &OutcomeData, from: SocketAddr, _sender: &mut dyn MessageSender) {
        self.record(HandlerEvent::Response(Message::new(sequence_number, MessageBody::LogoutResponse(data.clone())), from));
    }

    fn handle_heartbeat_timeout(&mut self, sequence_number: u32, to: SocketAddr, _sender: &mut dyn MessageSender) {
        self.record(HandlerEvent::Timeout(Message::heartbeat_request(sequence_number), to));
    }

    fn handle_login_timeout(&mut self, sequence_number: u32, data: &NameData, to: SocketAddr, _sender: &mut dyn MessageSender) {
        self.record(HandlerEvent::Timeout(Message::new(sequence_number, MessageBody::LoginRequest(data.clone())), to));
    }

    fn handle_logout_timeout(&mut self, sequence_number: u32, data: &NameData, to: SocketAddr, _sender: &mut dyn MessageSender) {
        self.record(HandlerEvent::Timeout(Message::new(sequence_number, MessageBody::LogoutRequest(data.clone())), to));
    }
}
