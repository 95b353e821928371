use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use chatlink::messaging::config::MessagingConfig;
use chatlink::messaging::dispatcher::{MessageHandler, MessageSender};
use chatlink::messaging::end_point::{EndPoint, EndPointHandle};
use chatlink::messaging::message::{ChatData, Message, NameData, OutcomeData};
use chatlink::util::sequence::SequenceNumbers;
use clap::Parser;
use clap_derive::Parser;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::select;
use tokio::time::{interval, sleep};
use tracing::{error, info, warn, Level};

/// A minimal chat: a server that users log in to, and clients that send each other messages
///  through the server.
#[derive(Parser)]
struct Args {
    /// run as the server, listening on this address
    #[clap(long)]
    listen: Option<String>,

    /// run as a client, connecting to the server at this address
    #[clap(long)]
    server: Option<String>,

    /// the client's user name
    #[clap(long)]
    name: Option<String>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    match (args.listen, args.server, args.name) {
        (Some(listen), None, _) => run_server(listen.parse()?).await,
        (None, Some(server), Some(name)) => run_client(server.parse()?, name).await,
        _ => Err(anyhow!("either --listen <addr>, or --server <addr> and --name <name> are required")),
    }
}


/// logged in users by name, shared between the server's handler and its heartbeat task
#[derive(Clone, Default)]
struct Users(Arc<Mutex<FxHashMap<String, SocketAddr>>>);
impl Users {
    fn lock(&self) -> MutexGuard<'_, FxHashMap<String, SocketAddr>> {
        self.0.lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

struct ServerHandler {
    users: Users,
    sequence_numbers: SequenceNumbers,
}

impl ServerHandler {
    fn name_of(&self, addr: SocketAddr) -> Option<String> {
        self.users.lock().iter()
            .find(|(_, a)| **a == addr)
            .map(|(name, _)| name.clone())
    }

    fn respond(sender: &mut dyn MessageSender, response: Message, to: SocketAddr) {
        if let Err(e) = sender.send(response, to) {
            error!("error responding to {:?}: {}", to, e);
        }
    }
}

impl MessageHandler for ServerHandler {
    fn handle_login_request(&mut self, sequence_number: u32, data: &NameData, from: SocketAddr, sender: &mut dyn MessageSender) {
        let response = {
            let mut users = self.users.lock();
            match users.get(&data.name) {
                Some(addr) if *addr != from => Message::login_response(sequence_number, false, "name taken"),
                _ => {
                    info!("{} logged in from {:?}", data.name, from);
                    users.insert(data.name.clone(), from);
                    Message::login_response(sequence_number, true, "")
                }
            }
        };
        Self::respond(sender, response, from);
    }

    fn handle_logout_request(&mut self, sequence_number: u32, data: &NameData, from: SocketAddr, sender: &mut dyn MessageSender) {
        let response = {
            let mut users = self.users.lock();
            if users.get(&data.name) == Some(&from) {
                info!("{} logged out", data.name);
                users.remove(&data.name);
                Message::logout_response(sequence_number, true, "")
            }
            else {
                Message::logout_response(sequence_number, false, "unknown")
            }
        };
        Self::respond(sender, response, from);
    }

    fn handle_chat(&mut self, _sequence_number: u32, data: &ChatData, from: SocketAddr, sender: &mut dyn MessageSender) {
        let Some(from_name) = self.name_of(from) else {
            warn!("chat message from {:?} who is not logged in - ignoring", from);
            return;
        };
        let Some(to) = self.users.lock().get(&data.recipient).copied() else {
            warn!("chat message from {} to unknown user {} - ignoring", from_name, data.recipient);
            return;
        };

        let forwarded = Message::chat(self.sequence_numbers.next_sequence_number(), from_name, data.content.clone());
        if let Err(e) = sender.send(forwarded, to) {
            error!("error forwarding chat message to {}: {}", data.recipient, e);
        }
    }

    fn handle_heartbeat_timeout(&mut self, _sequence_number: u32, to: SocketAddr, _sender: &mut dyn MessageSender) {
        let mut users = self.users.lock();
        let unresponsive = users.iter()
            .filter(|(_, addr)| **addr == to)
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        for name in unresponsive {
            info!("{} stopped responding - dropping", name);
            users.remove(&name);
        }
    }
}

async fn run_server(listen: SocketAddr) -> anyhow::Result<()> {
    let users = Users::default();
    let handler = ServerHandler {
        users: users.clone(),
        sequence_numbers: SequenceNumbers::new(),
    };

    let config = Arc::new(MessagingConfig::new(listen));
    let (end_point, handle) = EndPoint::new(config, handler).await?;

    select! {
        _ = end_point.run() => {}
        _ = heartbeat_users(users, handle) => {}
    }
    Ok(())
}

async fn heartbeat_users(users: Users, handle: EndPointHandle) {
    let mut sequence_numbers = SequenceNumbers::new();
    let mut heartbeats = interval(Duration::from_secs(5));
    loop {
        heartbeats.tick().await;

        let addrs = users.lock().values().copied().collect::<Vec<_>>();
        for addr in addrs {
            if let Err(e) = handle.send(Message::heartbeat_request(sequence_numbers.next_sequence_number()), addr).await {
                error!("error sending heartbeat to {:?}: {}", addr, e);
                return;
            }
        }
    }
}


struct ClientHandler;

impl MessageHandler for ClientHandler {
    fn handle_chat(&mut self, _sequence_number: u32, data: &ChatData, _from: SocketAddr, _sender: &mut dyn MessageSender) {
        // the server puts the original sender's name into the recipient field
        println!("{}: {}", data.recipient, data.content);
    }

    fn handle_login_response(&mut self, _sequence_number: u32, data: &OutcomeData, _from: SocketAddr, _sender: &mut dyn MessageSender) {
        if data.result {
            println!("logged in");
        }
        else {
            println!("login failed: {}", data.reason);
        }
    }

    fn handle_logout_response(&mut self, _sequence_number: u32, _data: &OutcomeData, _from: SocketAddr, _sender: &mut dyn MessageSender) {
        println!("logged out");
    }

    fn handle_heartbeat_timeout(&mut self, _sequence_number: u32, to: SocketAddr, _sender: &mut dyn MessageSender) {
        warn!("server {:?} is not responding", to);
    }

    fn handle_login_timeout(&mut self, _sequence_number: u32, _data: &NameData, to: SocketAddr, _sender: &mut dyn MessageSender) {
        println!("login failed: server {:?} is not responding", to);
    }
}

async fn run_client(server: SocketAddr, name: String) -> anyhow::Result<()> {
    let local_addr = if server.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    }
    else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let config = Arc::new(MessagingConfig::new(local_addr));
    let (end_point, handle) = EndPoint::new(config, ClientHandler).await?;
    let end_point_task = tokio::spawn(end_point.run());

    let mut sequence_numbers = SequenceNumbers::new();
    handle.send(Message::login_request(sequence_numbers.next_sequence_number(), name.as_str()), server).await?;

    println!("type '<recipient>: <message>' to chat, '/quit' to leave");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut heartbeats = interval(Duration::from_secs(5));

    loop {
        select! {
            line = lines.next_line() => {
                match line? {
                    None => break,
                    Some(line) if line.trim() == "/quit" => break,
                    Some(line) => send_chat(&handle, &mut sequence_numbers, server, &line).await,
                }
            }
            _ = heartbeats.tick() => {
                handle.send(Message::heartbeat_request(sequence_numbers.next_sequence_number()), server).await?;
            }
        }
    }

    handle.send(Message::logout_request(sequence_numbers.next_sequence_number(), name.as_str()), server).await?;
    // give the logout a chance to be acknowledged
    sleep(Duration::from_secs(1)).await;

    handle.close().await;
    end_point_task.await?;
    Ok(())
}

async fn send_chat(handle: &EndPointHandle, sequence_numbers: &mut SequenceNumbers, server: SocketAddr, line: &str) {
    let Some((recipient, content)) = line.split_once(':') else {
        println!("expected '<recipient>: <message>'");
        return;
    };

    let message = Message::chat(sequence_numbers.next_sequence_number(), recipient.trim(), content.trim());
    if let Err(e) = handle.send(message, server).await {
        println!("could not send: {}", e);
    }
}
