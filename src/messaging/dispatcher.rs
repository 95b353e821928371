use std::net::SocketAddr;

use tracing::{debug, error, trace};

use crate::messaging::delivery::{DeliveryManager, DeliveryTimeout};
use crate::messaging::error::MessagingError;
use crate::messaging::message::{BroadcastData, ChatData, Message, MessageBody, MessageHeader, NameData, OutcomeData};
use crate::messaging::transport::Transport;


/// Sending from inside the end point's loop, i.e. from handler callbacks.
pub trait MessageSender {
    /// Requests that expect a response are tracked and retransmitted until they are answered,
    ///  all other messages are sent once.
    fn send(&mut self, message: Message, to: SocketAddr) -> Result<(), MessagingError>;
}

/// The [MessageSender] handed to handlers, borrowing the end point's transport and pending
///  requests for the duration of a single callback.
pub struct Outbox<'a> {
    transport: &'a dyn Transport,
    delivery: &'a mut DeliveryManager,
}
impl <'a> Outbox<'a> {
    pub fn new(transport: &'a dyn Transport, delivery: &'a mut DeliveryManager) -> Outbox<'a> {
        Outbox {
            transport,
            delivery,
        }
    }
}

impl MessageSender for Outbox<'_> {
    fn send(&mut self, message: Message, to: SocketAddr) -> Result<(), MessagingError> {
        if message.kind().expects_response() {
            return self.delivery.send_request(message, to);
        }

        let encoded = message.encode()?;
        debug!("sending {:?} #{} to {:?}", message.kind(), message.sequence_number, to);
        self.transport.send(to, &encoded);
        Ok(())
    }
}


/// The application's callbacks. There is one method per message kind the application may want to
///  react to, and at most one of them is called per received message or timed out request.
///
/// All methods have default implementations that just log, so an implementation needs to
///  override only what it cares about. Heartbeat requests are answered by the dispatcher itself
///  and never reach the handler.
///
/// Callbacks run inside the end point's loop and should return quickly.
#[allow(unused_variables)]
pub trait MessageHandler: Send + 'static {
    fn handle_login_request(&mut self, sequence_number: u32, data: &NameData, from: SocketAddr, sender: &mut dyn MessageSender) {
        debug!("unhandled login request #{} from {:?}", sequence_number, from);
    }

    fn handle_logout_request(&mut self, sequence_number: u32, data: &NameData, from: SocketAddr, sender: &mut dyn MessageSender) {
        debug!("unhandled logout request #{} from {:?}", sequence_number, from);
    }

    fn handle_chat(&mut self, sequence_number: u32, data: &ChatData, from: SocketAddr, sender: &mut dyn MessageSender) {
        debug!("unhandled chat message #{} from {:?}", sequence_number, from);
    }

    fn handle_broadcast(&mut self, sequence_number: u32, data: &BroadcastData, from: SocketAddr, sender: &mut dyn MessageSender) {
        debug!("unhandled broadcast message #{} from {:?}", sequence_number, from);
    }

    fn handle_heartbeat_response(&mut self, sequence_number: u32, from: SocketAddr, sender: &mut dyn MessageSender) {
        trace!("heartbeat response #{} from {:?}", sequence_number, from);
    }

    fn handle_login_response(&mut self, sequence_number: u32, data: &OutcomeData, from: SocketAddr, sender: &mut dyn MessageSender) {
        debug!("unhandled login response #{} from {:?}", sequence_number, from);
    }

    fn handle_logout_response(&mut self, sequence_number: u32, data: &OutcomeData, from: SocketAddr, sender: &mut dyn MessageSender) {
        debug!("unhandled logout response #{} from {:?}", sequence_number, from);
    }

    fn handle_heartbeat_timeout(&mut self, sequence_number: u32, to: SocketAddr, sender: &mut dyn MessageSender) {
        debug!("unhandled heartbeat timeout #{} for {:?}", sequence_number, to);
    }

    fn handle_login_timeout(&mut self, sequence_number: u32, data: &NameData, to: SocketAddr, sender: &mut dyn MessageSender) {
        debug!("unhandled login timeout #{} for {:?}", sequence_number, to);
    }

    fn handle_logout_timeout(&mut self, sequence_number: u32, data: &NameData, to: SocketAddr, sender: &mut dyn MessageSender) {
        debug!("unhandled logout timeout #{} for {:?}", sequence_number, to);
    }
}


/// Routes received messages and delivery timeouts to the [MessageHandler].
///
/// Responses are matched against pending requests first, and only responses that acknowledge a
///  pending request reach the handler. The transport and the pending requests are passed in
///  explicitly on every call since they are owned by the end point.
pub struct Dispatcher<H: MessageHandler> {
    handler: H,
}

impl <H: MessageHandler> Dispatcher<H> {
    pub fn new(handler: H) -> Dispatcher<H> {
        Dispatcher {
            handler,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn on_datagram(&mut self, buf: &[u8], from: SocketAddr, transport: &dyn Transport, delivery: &mut DeliveryManager) -> Result<(), MessagingError> {
        let header = MessageHeader::peek(buf)?;
        if header.kind().is_none() {
            return Err(MessagingError::UnknownMessageKind(header.kind_tag));
        }

        let message = Message::decode(buf)?;
        self.dispatch(message, from, transport, delivery)
    }

    pub fn dispatch(&mut self, message: Message, from: SocketAddr, transport: &dyn Transport, delivery: &mut DeliveryManager) -> Result<(), MessagingError> {
        debug!("dispatching {:?} #{} from {:?}", message.kind(), message.sequence_number, from);

        let sequence_number = message.sequence_number;
        match &message.body {
            MessageBody::HeartbeatRequest => {
                Outbox::new(transport, delivery)
                    .send(Message::heartbeat_response(sequence_number), from)?;
            }
            MessageBody::LoginRequest(data) => {
                self.handler.handle_login_request(sequence_number, data, from, &mut Outbox::new(transport, delivery));
            }
            MessageBody::LogoutRequest(data) => {
                self.handler.handle_logout_request(sequence_number, data, from, &mut Outbox::new(transport, delivery));
            }
            MessageBody::Chat(data) => {
                self.handler.handle_chat(sequence_number, data, from, &mut Outbox::new(transport, delivery));
            }
            MessageBody::Broadcast(data) => {
                self.handler.handle_broadcast(sequence_number, data, from, &mut Outbox::new(transport, delivery));
            }
            MessageBody::HeartbeatResponse => {
                delivery.on_response_received(&message, from)?;
                self.handler.handle_heartbeat_response(sequence_number, from, &mut Outbox::new(transport, delivery));
            }
            MessageBody::LoginResponse(data) => {
                delivery.on_response_received(&message, from)?;
                self.handler.handle_login_response(sequence_number, data, from, &mut Outbox::new(transport, delivery));
            }
            MessageBody::LogoutResponse(data) => {
                delivery.on_response_received(&message, from)?;
                self.handler.handle_logout_response(sequence_number, data, from, &mut Outbox::new(transport, delivery));
            }
        }
        Ok(())
    }

    pub fn on_delivery_timeout(&mut self, timeout: DeliveryTimeout, transport: &dyn Transport, delivery: &mut DeliveryManager) {
        let sequence_number = timeout.request.sequence_number;
        let mut outbox = Outbox::new(transport, delivery);

        match &timeout.request.body {
            MessageBody::HeartbeatRequest => {
                self.handler.handle_heartbeat_timeout(sequence_number, timeout.to, &mut outbox);
            }
            MessageBody::LoginRequest(data) => {
                self.handler.handle_login_timeout(sequence_number, data, timeout.to, &mut outbox);
            }
            MessageBody::LogoutRequest(data) => {
                self.handler.handle_logout_timeout(sequence_number, data, timeout.to, &mut outbox);
            }
            _ => {
                error!("timeout for {:?} message that can not have been pending - this is a bug", timeout.request.kind());
            }
        }
    }
}
