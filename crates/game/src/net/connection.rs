use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::protocol::PlayerId;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
        }
    }
}

#[derive(Debug)]
pub struct PeerConnection {
    pub addr: SocketAddr,
    pub peer_id: PlayerId,
    pub salt: u64,
    pub connected_at: Instant,
    pub last_receive_time: Instant,
    pub last_send_time: Instant,
    pub send_sequence: u32,
}

impl PeerConnection {
    pub fn new(addr: SocketAddr, peer_id: PlayerId, salt: u64) -> Self {
        let now = Instant::now();
        Self {
            addr,
            peer_id,
            salt,
            connected_at: now,
            last_receive_time: now,
            last_send_time: now,
            send_sequence: 0,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_receive_time.elapsed() > timeout
    }

    pub fn touch(&mut self) {
        self.last_receive_time = Instant::now();
    }

    pub fn next_sequence(&mut self) -> u32 {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        self.last_send_time = Instant::now();
        sequence
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitError {
    Full,
}

#[derive(Debug)]
pub struct PeerManager {
    peers_by_addr: HashMap<SocketAddr, PlayerId>,
    peers: HashMap<PlayerId, PeerConnection>,
    next_peer_id: PlayerId,
    max_peers: usize,
    timeout: Duration,
}

impl PeerManager {
    pub fn new(max_peers: usize) -> Self {
        Self::with_timeout(max_peers, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(max_peers: usize, timeout: Duration) -> Self {
        Self {
            peers_by_addr: HashMap::new(),
            peers: HashMap::new(),
            next_peer_id: 1,
            max_peers,
            timeout,
        }
    }

    /// Returns the peer for `addr`, admitting it if it is new. The flag tells
    /// whether the peer was created by this call.
    pub fn admit(
        &mut self,
        addr: SocketAddr,
        salt: u64,
    ) -> Result<(&mut PeerConnection, bool), AdmitError> {
        if let Some(&peer_id) = self.peers_by_addr.get(&addr) {
            // A new salt from a known address is a restarted client.
            let stale = self.peers.get(&peer_id).is_some_and(|p| p.salt != salt);
            if !stale {
                return self
                    .peers
                    .get_mut(&peer_id)
                    .map(|peer| (peer, false))
                    .ok_or(AdmitError::Full);
            }
            self.remove(peer_id);
        }

        if self.peers.len() >= self.max_peers {
            return Err(AdmitError::Full);
        }

        let peer_id = self.next_peer_id;
        self.next_peer_id = self.next_peer_id.wrapping_add(1).max(1);

        self.peers_by_addr.insert(addr, peer_id);
        let peer = self
            .peers
            .entry(peer_id)
            .or_insert_with(|| PeerConnection::new(addr, peer_id, salt));
        Ok((peer, true))
    }

    pub fn get(&self, peer_id: PlayerId) -> Option<&PeerConnection> {
        self.peers.get(&peer_id)
    }

    pub fn get_mut(&mut self, peer_id: PlayerId) -> Option<&mut PeerConnection> {
        self.peers.get_mut(&peer_id)
    }

    pub fn get_by_addr(&self, addr: &SocketAddr) -> Option<&PeerConnection> {
        self.peers_by_addr
            .get(addr)
            .and_then(|id| self.peers.get(id))
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut PeerConnection> {
        if let Some(&id) = self.peers_by_addr.get(addr) {
            self.peers.get_mut(&id)
        } else {
            None
        }
    }

    pub fn remove(&mut self, peer_id: PlayerId) -> Option<PeerConnection> {
        if let Some(peer) = self.peers.remove(&peer_id) {
            self.peers_by_addr.remove(&peer.addr);
            Some(peer)
        } else {
            None
        }
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<PeerConnection> {
        if let Some(peer_id) = self.peers_by_addr.remove(addr) {
            self.peers.remove(&peer_id)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerConnection> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerConnection> {
        self.peers.values_mut()
    }

    pub fn cleanup_timed_out(&mut self) -> Vec<PlayerId> {
        let timed_out: Vec<PlayerId> = self
            .peers
            .iter()
            .filter(|(_, p)| p.is_timed_out(self.timeout))
            .map(|(&id, _)| id)
            .collect();

        for id in &timed_out {
            self.remove(*id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.max_peers
    }
}
