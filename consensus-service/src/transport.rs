//! The boundary between the consensus service and the network.
//!
//! The service only needs two things from a network: a way to broadcast
//! encoded consensus messages to the rest of the committee, and a stream of
//! `(sender_addr, bytes)` pairs arriving from peers. Framing, connection
//! management and retries belong to the transport.

use {
    crate::error::TransportError,
    crossbeam_channel::{Receiver, Sender, TrySendError},
    log::*,
    std::net::{Ipv4Addr, SocketAddr},
};

/// Raw bytes received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// The remote socket address that sent it.
    pub sender_addr: SocketAddr,
    /// One encoded consensus message.
    pub bytes: Vec<u8>,
}

/// Delivers encoded messages to every other committee member.
pub trait Transport: Send + Sync {
    /// Best-effort broadcast. An error means at least one peer was not
    /// reached; the consensus layer does not retry.
    fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// A transport over in-process bounded channels, one per peer.
///
/// Used to wire several services together in one process.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    local_addr: SocketAddr,
    peers: Vec<(SocketAddr, Sender<InboundMessage>)>,
}

impl ChannelTransport {
    pub fn new(local_addr: SocketAddr, peers: Vec<(SocketAddr, Sender<InboundMessage>)>) -> Self {
        Self { local_addr, peers }
    }

    /// A fully connected mesh of `n` transports. Entry `i` broadcasts to
    /// every receiver except its own.
    pub fn mesh(n: usize, capacity: usize) -> Vec<(ChannelTransport, Receiver<InboundMessage>)> {
        let endpoints: Vec<(SocketAddr, Sender<InboundMessage>, Receiver<InboundMessage>)> = (0..n)
            .map(|i| {
                let port = u16::try_from(i).unwrap_or(u16::MAX).saturating_add(8_000);
                let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
                let (sender, receiver) = crossbeam_channel::bounded(capacity);
                (addr, sender, receiver)
            })
            .collect();

        endpoints
            .iter()
            .map(|(addr, _, receiver)| {
                let peers = endpoints
                    .iter()
                    .filter(|(peer, _, _)| peer != addr)
                    .map(|(peer, sender, _)| (*peer, sender.clone()))
                    .collect();
                (ChannelTransport::new(*addr, peers), receiver.clone())
            })
            .collect()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for ChannelTransport {
    fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut first_failure = None;
        for (addr, sender) in &self.peers {
            let message = InboundMessage {
                sender_addr: self.local_addr,
                bytes: bytes.to_vec(),
            };
            let result = match sender.try_send(message) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => TransportError::Full(*addr),
                Err(TrySendError::Disconnected(_)) => TransportError::Disconnected(*addr),
            };
            trace!("{} -> {addr}: {result}", self.local_addr);
            first_failure.get_or_insert(result);
        }
        first_failure.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, assert_matches::assert_matches};

    #[test]
    fn test_mesh_reaches_every_other_peer() {
        let mesh = ChannelTransport::mesh(3, 8);
        let (transport, own_inbox) = &mesh[0];
        transport.broadcast(b"hello").unwrap();

        assert!(own_inbox.try_recv().is_err());
        for (_, inbox) in &mesh[1..] {
            let received = inbox.try_recv().unwrap();
            assert_eq!(received.bytes, b"hello".to_vec());
            assert_eq!(received.sender_addr, transport.local_addr());
        }
    }

    #[test]
    fn test_full_peer_reported() {
        let mesh = ChannelTransport::mesh(2, 1);
        let (transport, _) = &mesh[0];
        let peer_addr = mesh[1].0.local_addr();
        transport.broadcast(b"a").unwrap();
        assert_matches!(transport.broadcast(b"b"), Err(TransportError::Full(addr)) if addr == peer_addr);
    }

    #[test]
    fn test_disconnected_peer_reported() {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        drop(receiver);
        let peer = SocketAddr::from((Ipv4Addr::LOCALHOST, 9_001));
        let transport = ChannelTransport::new(SocketAddr::from((Ipv4Addr::LOCALHOST, 9_000)), vec![(peer, sender)]);
        assert_eq!(transport.broadcast(b"x"), Err(TransportError::Disconnected(peer)));
    }
}
