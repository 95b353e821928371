use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, span, warn, Level};
use uuid::Uuid;

use crate::messaging::config::MessagingConfig;
use crate::messaging::delivery::DeliveryManager;
use crate::messaging::dispatcher::{Dispatcher, MessageHandler, MessageSender, Outbox};
use crate::messaging::error::MessagingError;
use crate::messaging::message::Message;
use crate::messaging::transport::{Transport, UdpTransport};


/// upper bound for the number of datagrams processed in one go, so that a flood of incoming
///  datagrams can not hold up ticks and application requests indefinitely
const MAX_DATAGRAMS_PER_WAKEUP: usize = 64;

/// pause after a failure waiting for the socket, so a persistent error does not turn the loop
///  into a busy loop
const READABLE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

enum EndPointCommand {
    Send {
        message: Message,
        to: SocketAddr,
        result: oneshot::Sender<Result<(), MessagingError>>,
    },
    Close,
}


/// The application's way of talking to a running [EndPoint] from other tasks. Cloning is cheap.
#[derive(Clone)]
pub struct EndPointHandle {
    self_addr: SocketAddr,
    commands: mpsc::Sender<EndPointCommand>,
}
impl Debug for EndPointHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EndPointHandle{{self_addr:{:?}}}", self.self_addr)
    }
}

impl EndPointHandle {
    pub fn self_addr(&self) -> SocketAddr {
        self.self_addr
    }

    /// Sends a message, returning once it was handed to the socket. Requests are retransmitted
    ///  until they are answered or time out, with the outcome reported to the end point's
    ///  [MessageHandler].
    pub async fn send(&self, message: Message, to: SocketAddr) -> Result<(), MessagingError> {
        let (result_sender, result_receiver) = oneshot::channel();

        self.commands.send(EndPointCommand::Send { message, to, result: result_sender }).await
            .map_err(|_| MessagingError::EndPointClosed)?;

        result_receiver.await
            .map_err(|_| MessagingError::EndPointClosed)?
    }

    /// Closes the end point: its socket stops receiving, and pending requests are abandoned without
    ///  reporting timeouts.
    pub async fn close(&self) {
        if self.commands.send(EndPointCommand::Close).await.is_err() {
            debug!("end point {:?} is already closed", self.self_addr);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}


/// EndPoint is where everything comes together. It owns the transport, the pending requests and
///  the dispatcher with the application's handler, and runs them in a single loop that waits for
///  one of three things:
///
/// * a datagram arrives on the socket: it is decoded and dispatched
/// * the retry interval elapsed: pending requests are retransmitted or time out
/// * the application wants to send a message or close the end point (via [EndPointHandle])
///
/// All state is owned by the loop, so there is no locking, and each datagram / tick is processed
///  completely before the next one.
pub struct EndPoint<H: MessageHandler> {
    config: Arc<MessagingConfig>,
    self_addr: SocketAddr,
    transport: Arc<dyn Transport>,
    delivery: DeliveryManager,
    dispatcher: Dispatcher<H>,
    commands: mpsc::Receiver<EndPointCommand>,
}

impl <H: MessageHandler> EndPoint<H> {
    /// binds a UDP socket to the configured address
    pub async fn new(config: Arc<MessagingConfig>, handler: H) -> anyhow::Result<(EndPoint<H>, EndPointHandle)> {
        config.validate()?;
        let transport = Arc::new(UdpTransport::bind(config.self_addr, config.reuse_address)?);
        Self::with_transport(config, transport, handler)
    }

    pub fn with_transport(config: Arc<MessagingConfig>, transport: Arc<dyn Transport>, handler: H) -> anyhow::Result<(EndPoint<H>, EndPointHandle)> {
        config.validate()?;

        let self_addr = transport.local_addr()?;
        let (command_sender, command_receiver) = mpsc::channel(config.command_channel_capacity);

        let end_point = EndPoint {
            delivery: DeliveryManager::new(config.max_retry_times, transport.clone()),
            config,
            self_addr,
            transport,
            dispatcher: Dispatcher::new(handler),
            commands: command_receiver,
        };
        let handle = EndPointHandle {
            self_addr,
            commands: command_sender,
        };
        Ok((end_point, handle))
    }

    pub fn self_addr(&self) -> SocketAddr {
        self.self_addr
    }

    /// Runs until the end point is closed, either explicitly or by dropping all handles. Returns
    ///  the handler.
    pub async fn run(mut self) -> H {
        info!("starting end point on {:?}", self.self_addr);

        let retry_interval = self.config.retry_interval;
        let mut ticks = interval_at(Instant::now() + retry_interval, retry_interval);
        // a late tick does not cause additional ticks to catch up
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut buf = vec![0u8; self.config.receive_buffer_size];

        loop {
            select! {
                readable = self.transport.readable() => {
                    match readable {
                        Ok(()) => self.on_readable(&mut buf),
                        Err(e) => {
                            error!("error waiting for datagrams: {}", e);
                            sleep(READABLE_ERROR_BACKOFF).await;
                        }
                    }
                }
                _ = ticks.tick() => {
                    self.on_tick();
                }
                command = self.commands.recv() => {
                    match command {
                        Some(EndPointCommand::Send { message, to, result }) => {
                            let send_result = Outbox::new(self.transport.as_ref(), &mut self.delivery)
                                .send(message, to);
                            if let Err(e) = &send_result {
                                debug!("rejected message to {:?}: {}", to, e);
                            }
                            // the caller may have stopped waiting, which is fine
                            let _ = result.send(send_result);
                        }
                        Some(EndPointCommand::Close) | None => break,
                    }
                }
            }
        }

        self.close();
        self.dispatcher.into_handler()
    }

    fn on_readable(&mut self, buf: &mut [u8]) {
        for _ in 0..MAX_DATAGRAMS_PER_WAKEUP {
            let Some((len, from)) = self.transport.poll_receive(buf) else {
                return;
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "datagram_received", ?correlation_id);
            let _entered = span.enter();

            if let Err(e) = self.dispatcher.on_datagram(&buf[..len], from, self.transport.as_ref(), &mut self.delivery) {
                warn!("dropping datagram from {:?}: {}", from, e);
            }
        }
    }

    fn on_tick(&mut self) {
        for timeout in self.delivery.on_tick() {
            debug!("{}", timeout.as_error());
            self.dispatcher.on_delivery_timeout(timeout, self.transport.as_ref(), &mut self.delivery);
        }
    }

    fn close(&mut self) {
        info!("closing end point on {:?}", self.self_addr);
        self.commands.close();
        self.transport.close();
        self.delivery.abandon_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use anyhow::anyhow;
    use crate::messaging::message::{Message, MessageBody};
    use crate::messaging::transport::MockTransport;
    use crate::test_util::{test_addr, HandlerEvent, RecordingHandler, TrackingTransport};
    use super::*;

    fn config() -> Arc<MessagingConfig> {
        Arc::new(MessagingConfig {
            retry_interval: Duration::from_secs(1),
            ..MessagingConfig::new(test_addr(1000))
        })
    }

    fn start(handler: RecordingHandler) -> (Arc<TrackingTransport>, EndPointHandle, tokio::task::JoinHandle<RecordingHandler>) {
        let transport = TrackingTransport::new(test_addr(1000));
        let (end_point, handle) = EndPoint::with_transport(config(), transport.clone(), handler).unwrap();
        let join_handle = tokio::spawn(end_point.run());
        (transport, handle, join_handle)
    }

    fn encoded(msg: &Message) -> Vec<u8> {
        msg.encode().unwrap().to_vec()
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_after_three_retransmissions() {
        let handler = RecordingHandler::default();
        let (transport, handle, _) = start(handler.clone());

        handle.send(Message::heartbeat_request(7), test_addr(1)).await.unwrap();

        sleep(Duration::from_millis(2500)).await;
        assert!(handler.events().is_empty());
        assert_eq!(transport.sent().len(), 3);

        sleep(Duration::from_millis(1000)).await;
        assert_eq!(handler.events(), vec![HandlerEvent::Timeout(Message::heartbeat_request(7), test_addr(1))]);

        let sent = transport.sent();
        assert_eq!(sent.len(), 4);
        for (to, buf) in sent {
            assert_eq!(to, test_addr(1));
            assert_eq!(buf, encoded(&Message::heartbeat_request(7)));
        }

        sleep(Duration::from_secs(10)).await;
        assert_eq!(handler.events().len(), 1);
        assert_eq!(transport.sent().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_loop_retransmits_once_per_missed_interval() {
        let (transport, handle, _) = start(RecordingHandler::default());

        handle.send(Message::login_request(3, "alice"), test_addr(1)).await.unwrap();
        assert_eq!(transport.take_sent().len(), 1);

        // the loop does not get to run while the clock jumps past two and a half intervals
        tokio::time::advance(Duration::from_millis(2500)).await;
        sleep(Duration::from_millis(900)).await;
        assert_eq!(transport.take_sent(), vec![(test_addr(1), encoded(&Message::login_request(3, "alice")))]);

        // the next tick is one interval after the late one
        sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.take_sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_readable_backs_off() {
        let readable_calls = Arc::new(AtomicUsize::new(0));

        let mut transport = MockTransport::new();
        transport.expect_local_addr()
            .returning(|| Ok(test_addr(1000)));
        let counter = readable_calls.clone();
        transport.expect_readable()
            .returning(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("socket error"))
            });
        transport.expect_close()
            .return_const(());

        let (end_point, handle) = EndPoint::with_transport(config(), Arc::new(transport), RecordingHandler::default()).unwrap();
        let join_handle = tokio::spawn(end_point.run());

        sleep(Duration::from_secs(1)).await;
        handle.close().await;
        join_handle.await.unwrap();

        let calls = readable_calls.load(Ordering::SeqCst);
        assert!(calls >= 5 && calls <= 15, "readable was called {} times", calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_response_before_first_tick() {
        let handler = RecordingHandler::default();
        let (transport, handle, _) = start(handler.clone());

        handle.send(Message::login_request(1, "alice"), test_addr(1)).await.unwrap();
        transport.inject(&encoded(&Message::login_response(1, true, "")), test_addr(1));

        sleep(Duration::from_millis(500)).await;
        assert_eq!(handler.events(), vec![HandlerEvent::Response(Message::login_response(1, true, ""), test_addr(1))]);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.sent(), vec![(test_addr(1), encoded(&Message::login_request(1, "alice")))]);
        assert_eq!(handler.events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_datagrams_do_not_stop_the_loop() {
        let handler = RecordingHandler::default();
        let (transport, handle, _) = start(handler.clone());

        handle.send(Message::heartbeat_request(3), test_addr(2)).await.unwrap();

        transport.inject(b"\0\x63\0\0\0\x01", test_addr(1));
        transport.inject(b"\0\x03\0\0", test_addr(1));
        transport.inject(&encoded(&Message::heartbeat_response(99)), test_addr(1));
        transport.inject(&encoded(&Message::heartbeat_request(5)), test_addr(1));
        transport.inject(&encoded(&Message::chat(6, "bob", "still there?")), test_addr(1));

        sleep(Duration::from_millis(500)).await;

        assert_eq!(handler.events(), vec![HandlerEvent::Request(Message::chat(6, "bob", "still there?"), test_addr(1))]);
        assert_eq!(transport.sent(), vec![
            (test_addr(2), encoded(&Message::heartbeat_request(3))),
            (test_addr(1), encoded(&Message::heartbeat_response(5))),
        ]);

        // the unrelated pending request is unaffected
        transport.inject(&encoded(&Message::heartbeat_response(3)), test_addr(2));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.events().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_messages_are_not_retransmitted() {
        let (transport, handle, _) = start(RecordingHandler::default());

        handle.send(Message::chat(1, "bob", "hi"), test_addr(1)).await.unwrap();
        handle.send(Message::broadcast(2, 1, 2), test_addr(1)).await.unwrap();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_field_too_long_is_rejected_before_sending() {
        let (transport, handle, _) = start(RecordingHandler::default());

        let result = handle.send(Message::chat(1, "bob", "x".repeat(2000)), test_addr(1)).await;
        assert_eq!(result, Err(MessagingError::FieldTooLong { field: "content", max: 1024, actual: 2000 }));

        sleep(Duration::from_secs(1)).await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_abandons_pending_requests() {
        let handler = RecordingHandler::default();
        let (transport, handle, join_handle) = start(handler.clone());

        handle.send(Message::login_request(1, "alice"), test_addr(1)).await.unwrap();
        handle.close().await;

        let returned_handler = join_handle.await.unwrap();
        assert!(handle.is_closed());
        assert_eq!(handle.send(Message::heartbeat_request(2), test_addr(1)).await, Err(MessagingError::EndPointClosed));

        transport.inject(&encoded(&Message::login_response(1, true, "")), test_addr(1));
        sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.sent().len(), 1);
        assert!(returned_handler.events().is_empty());
        assert!(handler.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_all_handles_terminates() {
        let (_, handle, join_handle) = start(RecordingHandler::default());
        drop(handle);
        join_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_login_over_udp() {
        let server_handler = RecordingHandler::answering_requests();
        let (server, server_handle) = EndPoint::new(
            Arc::new(MessagingConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)))),
            server_handler.clone(),
        ).await.unwrap();
        tokio::spawn(server.run());

        let client_handler = RecordingHandler::default();
        let (client, client_handle) = EndPoint::new(
            Arc::new(MessagingConfig {
                retry_interval: Duration::from_millis(200),
                ..MessagingConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)))
            }),
            client_handler.clone(),
        ).await.unwrap();
        tokio::spawn(client.run());

        client_handle.send(Message::login_request(1, "alice"), server_handle.self_addr()).await.unwrap();
        client_handle.send(Message::heartbeat_request(2), server_handle.self_addr()).await.unwrap();

        let events = client_handler.wait_for_events(2, Duration::from_secs(5)).await;
        assert!(events.contains(&HandlerEvent::Response(Message::login_response(1, true, ""), server_handle.self_addr())));
        assert!(events.contains(&HandlerEvent::Response(Message::heartbeat_response(2), server_handle.self_addr())));

        let server_events = server_handler.events();
        assert!(server_events.iter().any(|e| matches!(e, HandlerEvent::Request(Message { body: MessageBody::LoginRequest(data), .. }, from)
            if data.name == "alice" && *from == client_handle.self_addr())));

        client_handle.close().await;
        server_handle.close().await;
    }
}
