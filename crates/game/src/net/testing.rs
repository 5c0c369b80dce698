//! In-memory transport doubles for unit tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use super::protocol::PlayerId;
use super::transport::{
    Connector, Pinger, Priority, Reliability, Transport, TransportError, TransportEvent,
};

#[derive(Debug, Default)]
pub struct Link {
    pub inbound: VecDeque<TransportEvent>,
    pub sent: Vec<(Vec<u8>, Priority, Reliability)>,
    pub local_id: Option<PlayerId>,
    pub connected: bool,
    pub disconnected: bool,
}

/// The remote end of a `MemoryTransport`, held by the test.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    pub addr: SocketAddr,
    link: Arc<Mutex<Link>>,
}

impl MemoryPeer {
    pub fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap()
    }

    pub fn accept(&self, local_id: PlayerId) {
        let mut link = self.link();
        link.connected = true;
        link.local_id = Some(local_id);
        link.inbound.push_back(TransportEvent::ConnectionAccepted);
    }

    pub fn push(&self, event: TransportEvent) {
        self.link().inbound.push_back(event);
    }

    pub fn deliver(&self, data: Vec<u8>) {
        self.push(TransportEvent::Packet(data));
    }

    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        self.link().sent.drain(..).map(|(data, _, _)| data).collect()
    }

    pub fn is_disconnected(&self) -> bool {
        self.link().disconnected
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    addr: SocketAddr,
    link: Arc<Mutex<Link>>,
}

pub fn memory_pair(addr: SocketAddr) -> (MemoryTransport, MemoryPeer) {
    let link = Arc::new(Mutex::new(Link::default()));
    (
        MemoryTransport {
            addr,
            link: Arc::clone(&link),
        },
        MemoryPeer { addr, link },
    )
}

impl Transport for MemoryTransport {
    fn send(
        &mut self,
        data: &[u8],
        priority: Priority,
        reliability: Reliability,
    ) -> Result<(), TransportError> {
        let mut link = self.link.lock().unwrap();
        if !link.connected || link.disconnected {
            return Err(TransportError::NotConnected);
        }
        link.sent.push((data.to_vec(), priority, reliability));
        Ok(())
    }

    fn receive(&mut self) -> Option<TransportEvent> {
        self.link.lock().unwrap().inbound.pop_front()
    }

    fn disconnect(&mut self) {
        let mut link = self.link.lock().unwrap();
        link.disconnected = true;
        link.inbound.clear();
    }

    fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    fn local_id(&self) -> Option<PlayerId> {
        self.link.lock().unwrap().local_id
    }
}

/// Hands out memory transports and remembers every peer end it created.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    peers: Mutex<Vec<MemoryPeer>>,
    refuse: bool,
}

impl MemoryConnector {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn peers(&self) -> Vec<MemoryPeer> {
        self.peers.lock().unwrap().clone()
    }

    pub fn peers_for(&self, addr: SocketAddr) -> Vec<MemoryPeer> {
        self.peers()
            .into_iter()
            .filter(|p| p.addr == addr)
            .collect()
    }
}

impl Connector for MemoryConnector {
    type Connection = MemoryTransport;

    fn connect(&self, addr: SocketAddr) -> Result<MemoryTransport, TransportError> {
        if self.refuse {
            return Err(TransportError::NotConnected);
        }
        let (transport, peer) = memory_pair(addr);
        self.peers.lock().unwrap().push(peer);
        Ok(transport)
    }
}

#[derive(Debug, Default)]
pub struct MemoryPinger {
    pub pings: Mutex<Vec<SocketAddr>>,
    pub pongs: Mutex<VecDeque<SocketAddr>>,
}

impl MemoryPinger {
    pub fn pong_from(&self, addr: SocketAddr) {
        self.pongs.lock().unwrap().push_back(addr);
    }

    pub fn pinged(&self) -> Vec<SocketAddr> {
        self.pings.lock().unwrap().clone()
    }
}

impl Pinger for MemoryPinger {
    fn ping(&self, addr: SocketAddr) -> Result<(), TransportError> {
        self.pings.lock().unwrap().push(addr);
        Ok(())
    }

    fn receive_pong(&self) -> Option<SocketAddr> {
        self.pongs.lock().unwrap().pop_front()
    }
}
