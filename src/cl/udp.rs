//! Every node listens on one multicast group and port. Requests are JSON envelopes sent to
//! the whole group; a node ignores its own envelopes, and hands every other envelope to the
//! channel mounted for its message type. Nothing is acknowledged, ordered or deduplicated.
//!
//! The listener thread only decodes and forwards. Whatever reads a mounted channel runs on
//! its own thread, so a slow reader never holds up reception.
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::process;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};

use crate::cl::{ConvergenceLayer, GetResponse, Reply, ResponseMeta, SearchResults};
use crate::error::Error;
use crate::name::Name;

pub const SCHEME: &str = "niudp";
pub const MCAST_GROUP: Ipv4Addr = Ipv4Addr::new(225, 4, 5, 6);
pub const PORT: u16 = 2345;
pub const MAX_MSG_SIZE: usize = 65536;
pub const VERSION: &str = "NetInfUDP/1.0";

static INSTANCE: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "GET-RESP")]
    GetResp,
    #[serde(rename = "PUBLISH")]
    Publish,
    #[serde(rename = "SEARCH")]
    Search,
}

/// The JSON envelope of a datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdpMessage {
    pub instance: String,
    #[serde(rename = "message type")]
    pub msg_type: MessageType,
    #[serde(rename = "URI", default)]
    pub uri: String,
    #[serde(rename = "msgId")]
    pub msg_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locators: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<String>,
    #[serde(default)]
    pub version: String,
    /// Where the datagram came from; not part of the envelope.
    #[serde(skip)]
    pub source: Option<SocketAddr>,
}

impl UdpMessage {
    pub fn name(&self) -> Result<Name, Error> {
        Name::parse(&self.uri)
    }
}

#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub bind: SocketAddrV4,
    /// Where requests are sent. Group membership is only taken for a multicast target.
    pub target: SocketAddrV4,
    pub interface: Ipv4Addr,
    pub multicast_loop: bool,
    /// How often the listener checks whether it should stop.
    pub poll_interval: Duration,
}

impl Default for UdpConfig {
    fn default() -> UdpConfig {
        UdpConfig {
            bind: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, PORT),
            target: SocketAddrV4::new(MCAST_GROUP, PORT),
            interface: Ipv4Addr::UNSPECIFIED,
            multicast_loop: true,
            poll_interval: Duration::from_millis(200),
        }
    }
}

pub type Handlers = Arc<Mutex<HashMap<MessageType, Sender<UdpMessage>>>>;

fn lock(handlers: &Handlers) -> MutexGuard<'_, HashMap<MessageType, Sender<UdpMessage>>> {
    match handlers.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// What became of one received datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Delivered(MessageType),
    Own,
    Unhandled(MessageType),
    Malformed,
}

/// Decode a datagram and forward it to the channel mounted for its type.
pub fn dispatch(own_id: &str, handlers: &Handlers, datagram: &[u8], source: Option<SocketAddr>) -> Dispatch {
    let mut msg: UdpMessage = match serde_json::from_slice(datagram) {
        Ok(v) => v,
        Err(e) => {
            debug!("dropping undecodable datagram from {:?}: {}", source, e);
            return Dispatch::Malformed;
        },
    };
    if msg.instance == own_id {
        return Dispatch::Own;
    }
    msg.source = source;
    let typ = msg.msg_type;

    let mut h = lock(handlers);
    let gone = match h.get(&typ) {
        Some(tx) => tx.send(msg).is_err(),
        None => {
            debug!("no handler for {:?} from {}", typ, msg.instance);
            return Dispatch::Unhandled(typ);
        },
    };
    if gone {
        debug!("handler for {:?} went away", typ);
        h.remove(&typ);
        return Dispatch::Unhandled(typ);
    }
    Dispatch::Delivered(typ)
}

/// A fresh node identity: pid, per-process counter and a random tag, so that nodes in
/// separate hosts or containers never share one.
pub fn instance_id() -> String {
    let n = INSTANCE.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{}-{}-{:08x}", process::id(), n, rand::random::<u32>())
}

fn listen(socket: UdpSocket, id: String, handlers: Handlers, stop: Arc<AtomicBool>, poll_interval: Duration) {
    let mut buf = vec![0u8; MAX_MSG_SIZE];
    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((n, source)) => {
                let d = dispatch(&id, &handlers, &buf[..n], Some(source));
                debug!("{} bytes from {}: {:?}", n, source, d);
            },
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {},
            Err(e) => {
                debug!("receive error on {}: {}", id, e);
                thread::sleep(poll_interval);
            },
        }
    }
    debug!("listener {} stopped", id);
}

/// Wait for the answer to a request sent with `msg_id` for `name`.
///
/// Messages on the channel that belong to other requests are dropped.
pub fn await_reply(rx: &Receiver<UdpMessage>, name: &Name, msg_id: &str, timeout: Duration) -> Result<UdpMessage, Error> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(msg) => {
                let same_name = msg.name().map(|n| n == *name).unwrap_or(false);
                if same_name && msg.msg_id == msg_id {
                    return Ok(msg);
                }
                debug!("ignoring reply {} for {}", msg.msg_id, msg.uri);
            },
            Err(RecvTimeoutError::Timeout) => {
                return Err(Error::Timeout(format!("no reply for {} ({})", name, msg_id)));
            },
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::Unreachable(String::from("reply channel closed")));
            },
        }
    }
}

pub struct UdpConvergence {
    id: String,
    socket: UdpSocket,
    target: SocketAddr,
    handlers: Handlers,
    stop: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl UdpConvergence {
    /// Bind the socket, join the group and start listening.
    pub fn new(config: &UdpConfig) -> Result<UdpConvergence, Error> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::V4(config.bind).into())?;
        if config.target.ip().is_multicast() {
            socket.join_multicast_v4(config.target.ip(), &config.interface)?;
            socket.set_multicast_loop_v4(config.multicast_loop)?;
        }
        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(config.poll_interval))?;

        let id = instance_id();
        let handlers: Handlers = Arc::new(Mutex::new(HashMap::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let listener = {
            let recv_socket = socket.try_clone()?;
            let id = id.clone();
            let handlers = handlers.clone();
            let stop = stop.clone();
            let poll_interval = config.poll_interval;
            thread::Builder::new()
                .name(format!("netinf-udp-{}", id))
                .spawn(move || listen(recv_socket, id, handlers, stop, poll_interval))?
        };
        info!("udp node {} on {} sending to {}", id, config.bind, config.target);

        Ok(UdpConvergence {
            id,
            socket,
            target: SocketAddr::V4(config.target),
            handlers,
            stop,
            listener: Some(listener),
        })
    }

    /// This node's identity, carried as `instance` in every envelope it sends.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    /// Route messages of the given type to the returned channel, replacing any earlier one.
    pub fn mount(&self, msg_type: MessageType) -> Receiver<UdpMessage> {
        let (tx, rx) = channel();
        lock(&self.handlers).insert(msg_type, tx);
        rx
    }

    pub fn unmount(&self, msg_type: MessageType) {
        lock(&self.handlers).remove(&msg_type);
    }

    /// Send an envelope. Send failures are logged and otherwise look like packet loss.
    pub fn send(&self, msg: &UdpMessage) -> Result<(), Error> {
        let data = serde_json::to_vec(msg)?;
        if data.len() > MAX_MSG_SIZE {
            warn!("envelope of {} bytes exceeds datagram size", data.len());
        }
        match self.socket.send_to(&data, self.target) {
            Ok(n) => {
                debug!("sent {:?} {} ({} bytes) to {}", msg.msg_type, msg.msg_id, n, self.target);
            },
            Err(e) => {
                warn!("send to {} failed: {}", self.target, e);
            },
        }
        Ok(())
    }

    fn request(&self, msg_type: MessageType, uri: String, msg_id: &str) -> UdpMessage {
        UdpMessage {
            instance: self.id.clone(),
            msg_type,
            uri,
            msg_id: msg_id.to_string(),
            locators: None,
            tokens: None,
            version: VERSION.to_string(),
            source: None,
        }
    }

    /// Answer a GET with the locators this node knows for the name.
    pub fn get_response(&self, name: &Name, msg_id: &str, locators: &[String]) -> Result<(), Error> {
        let mut msg = self.request(MessageType::GetResp, name.to_wire_string(), msg_id);
        msg.locators = Some(locators.to_vec());
        self.send(&msg)
    }
}

impl ConvergenceLayer for UdpConvergence {
    fn scheme(&self) -> &str {
        SCHEME
    }

    /// Sends the request and returns at once; mount [MessageType::GetResp] for answers.
    fn get(&self, name: &Name, msg_id: &str, _next_hop: Option<&str>) -> Result<Reply<GetResponse>, Error> {
        self.send(&self.request(MessageType::Get, name.to_wire_string(), msg_id))?;
        Ok(Reply::Dispatched)
    }

    fn publish_object(
        &self,
        name: &Name,
        _octets: &[u8],
        _content_type: Option<&str>,
        _dest: &str,
        _msg_id: &str,
    ) -> Result<Reply<ResponseMeta>, Error> {
        Err(Error::Unsupported(format!("udp cannot carry the object for {}", name)))
    }

    fn publish_locators(&self, name: &Name, locators: &[String], _dest: &str, msg_id: &str) -> Result<Reply<ResponseMeta>, Error> {
        let mut msg = self.request(MessageType::Publish, name.to_wire_string(), msg_id);
        msg.locators = Some(locators.to_vec());
        self.send(&msg)?;
        Ok(Reply::Dispatched)
    }

    fn search(&self, _dest: &str, msg_id: &str, tokens: &str) -> Result<Reply<SearchResults>, Error> {
        let mut msg = self.request(MessageType::Search, String::new(), msg_id);
        msg.tokens = Some(tokens.to_string());
        self.send(&msg)?;
        Ok(Reply::Dispatched)
    }
}

impl Drop for UdpConvergence {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.listener.take() {
            if h.join().is_err() {
                error!("listener {} panicked", self.id);
            }
        }
    }
}
