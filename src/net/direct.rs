//! Direct peer channel over UDP.
//!
//! Datagrams are bare JSON `PeerPayload`s. The peer's address arrives through the relay in a
//! `direct_offer`. The channel counts as up from the first valid datagram received from
//! that address and as down after `timeout` of silence.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::net::link::LinkEvent;
use crate::ws::protocol::{PeerPayload, ProtocolError};

const MAX_DATAGRAM: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum DirectError {
    #[error("failed to bind direct socket: {0}")]
    Bind(#[source] io::Error),

    #[error("direct send failed: {0}")]
    Send(#[source] io::Error),

    #[error("no peer address known")]
    NoPeer,

    #[error("datagram too large: {0} bytes")]
    TooLarge(usize),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// A decoded datagram and who sent it
#[derive(Debug)]
pub struct Datagram {
    pub from: SocketAddr,
    pub payload: PeerPayload,
}

pub struct DirectChannel {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    advertise: SocketAddr,
    peer: Option<SocketAddr>,
    last_heard: Option<Instant>,
    up: bool,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl DirectChannel {
    /// Bind the socket and start the reader task feeding `inbound`
    pub async fn bind(
        bind: SocketAddr,
        advertise: Option<SocketAddr>,
        timeout: Duration,
        inbound: mpsc::Sender<Datagram>,
    ) -> Result<Self, DirectError> {
        let socket = Arc::new(UdpSocket::bind(bind).await.map_err(DirectError::Bind)?);
        let local_addr = socket.local_addr().map_err(DirectError::Bind)?;
        info!(%local_addr, "Direct channel listening");

        let reader = tokio::spawn(read_loop(socket.clone(), inbound));

        Ok(Self {
            socket,
            local_addr,
            advertise: advertise.unwrap_or(local_addr),
            peer: None,
            last_heard: None,
            up: false,
            timeout,
            reader,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address to put into our `direct_offer`
    pub fn advertised_addr(&self) -> SocketAddr {
        self.advertise
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    /// Adopt the address from the peer's offer. A new address starts out down.
    pub fn set_peer(&mut self, addr: SocketAddr) -> Option<LinkEvent> {
        if self.peer == Some(addr) {
            return None;
        }
        info!(peer = %addr, "Direct peer address learned");
        self.peer = Some(addr);
        self.last_heard = None;
        self.mark_down()
    }

    /// Drop the peer between matches
    pub fn forget_peer(&mut self) -> Option<LinkEvent> {
        self.peer = None;
        self.last_heard = None;
        self.mark_down()
    }

    /// Record a datagram. Returns false when it did not come from the known peer.
    pub fn on_datagram(&mut self, from: SocketAddr, now: Instant) -> (bool, Option<LinkEvent>) {
        if self.peer != Some(from) {
            debug!(%from, "Datagram from unknown address ignored");
            return (false, None);
        }
        self.last_heard = Some(now);
        if self.up {
            return (true, None);
        }
        self.up = true;
        info!(peer = %from, "Direct channel up");
        (true, Some(LinkEvent::DirectUp))
    }

    /// Periodic liveness check
    pub fn check(&mut self, now: Instant) -> Option<LinkEvent> {
        match self.last_heard {
            Some(at) if self.up && now.duration_since(at) > self.timeout => {
                warn!(peer = ?self.peer, "Direct channel silent, falling back to relay");
                self.mark_down()
            }
            _ => None,
        }
    }

    /// Send to the peer. Works before the channel is up so the peer can learn of us.
    pub async fn send(&self, payload: &PeerPayload) -> Result<(), DirectError> {
        let peer = self.peer.ok_or(DirectError::NoPeer)?;
        let bytes = payload.encode()?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(DirectError::TooLarge(bytes.len()));
        }
        self.socket
            .send_to(&bytes, peer)
            .await
            .map_err(DirectError::Send)?;
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.reader.abort();
        self.up = false;
    }

    fn mark_down(&mut self) -> Option<LinkEvent> {
        if !self.up {
            return None;
        }
        self.up = false;
        Some(LinkEvent::DirectDown)
    }
}

impl Drop for DirectChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(socket: Arc<UdpSocket>, inbound: mpsc::Sender<Datagram>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP port unreachable surfaces here on some platforms; keep listening.
                debug!(error = %e, "Direct receive failed");
                continue;
            }
        };

        match PeerPayload::decode(&buf[..len]) {
            Ok(payload) => {
                if inbound.send(Datagram { from, payload }).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(%from, error = %e, "Dropped direct datagram"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    async fn channel(inbound: mpsc::Sender<Datagram>) -> DirectChannel {
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        DirectChannel::bind(local, None, Duration::from_secs(3), inbound)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn datagrams_reach_the_peer_and_bring_the_link_up() {
        let (a_tx, _a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        let mut a = channel(a_tx).await;
        let mut b = channel(b_tx).await;

        a.set_peer(b.local_addr());
        b.set_peer(a.local_addr());
        assert_ok!(a.send(&PeerPayload::RematchRequest).await);

        let datagram = b_rx.recv().await.unwrap();
        assert_eq!(datagram.payload, PeerPayload::RematchRequest);
        assert_eq!(
            b.on_datagram(datagram.from, Instant::now()),
            (true, Some(LinkEvent::DirectUp))
        );
        assert!(b.is_up());
    }

    #[tokio::test]
    async fn silence_takes_the_link_down() {
        let (tx, _rx) = mpsc::channel(8);
        let mut chan = channel(tx).await;
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        chan.set_peer(peer);

        let start = Instant::now();
        chan.on_datagram(peer, start);
        assert_eq!(chan.check(start + Duration::from_secs(1)), None);
        assert_eq!(
            chan.check(start + Duration::from_secs(4)),
            Some(LinkEvent::DirectDown)
        );
        assert_eq!(chan.check(start + Duration::from_secs(5)), None);
    }

    #[tokio::test]
    async fn strangers_and_missing_peers_are_rejected() {
        let (tx, _rx) = mpsc::channel(8);
        let mut chan = channel(tx).await;
        let err = assert_err!(chan.send(&PeerPayload::Start).await);
        assert!(matches!(err, DirectError::NoPeer));

        chan.set_peer("127.0.0.1:9".parse().unwrap());
        let stranger: SocketAddr = "127.0.0.1:10".parse().unwrap();
        assert_eq!(chan.on_datagram(stranger, Instant::now()), (false, None));
        assert!(!chan.is_up());
    }
}
