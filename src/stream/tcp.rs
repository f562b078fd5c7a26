use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{ConfigError, TransportError};
use crate::stream::transport::{Advertisement, Session, Transport};

const READ_BUFFER: usize = 512;
const CHUNK_QUEUE: usize = 256;

/// A named bridge endpoint, `NAME=HOST:PORT` on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpPeer {
    pub name: String,
    pub address: String,
}

impl TcpPeer {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let (name, address) = text
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidParameters(format!("peer {:?} is not NAME=HOST:PORT", text)))?;
        let (name, address) = (name.trim(), address.trim());
        let port_ok = address
            .rsplit_once(':')
            .map_or(false, |(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if name.is_empty() || !port_ok {
            return Err(ConfigError::InvalidParameters(format!(
                "peer {:?} is not NAME=HOST:PORT",
                text
            )));
        }
        Ok(Self {
            name: name.to_string(),
            address: address.to_string(),
        })
    }
}

/// Serial/radio bridge that exposes each producer's byte stream on a TCP port.
/// Discovery probes the configured peers; EOF is a remote disconnect.
#[derive(Clone, Debug, Default)]
pub struct TcpTransport {
    peers: Vec<TcpPeer>,
}

impl TcpTransport {
    pub fn new(peers: Vec<TcpPeer>) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Session = TcpSession;

    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        let probes = self.peers.iter().map(|peer| async move {
            match tokio::time::timeout(window, TcpStream::connect(&peer.address)).await {
                Ok(Ok(_)) => Some(Advertisement {
                    name: Some(peer.name.clone()),
                    address: peer.address.clone(),
                }),
                Ok(Err(e)) => {
                    log::debug!("Peer {} unreachable: {}", peer.address, e);
                    None
                }
                Err(_) => None,
            }
        });
        Ok(join_all(probes).await.into_iter().flatten().collect())
    }

    async fn connect(&self, address: &str) -> Result<TcpSession, TransportError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", address, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("TCP_NODELAY on {} failed: {}", address, e);
        }
        Ok(TcpSession::new(address.to_string(), stream))
    }
}

/// How the reader task saw the socket end.
#[derive(Clone, Debug, PartialEq)]
enum LinkState {
    Open,
    Closed,
    Lost(String),
}

pub struct TcpSession {
    address: String,
    stream: Option<TcpStream>,
    reader: Option<JoinHandle<()>>,
    closed_tx: Option<watch::Sender<LinkState>>,
    closed_rx: watch::Receiver<LinkState>,
}

impl TcpSession {
    fn new(address: String, stream: TcpStream) -> Self {
        let (closed_tx, closed_rx) = watch::channel(LinkState::Open);
        Self {
            address,
            stream: Some(stream),
            reader: None,
            closed_tx: Some(closed_tx),
            closed_rx,
        }
    }

    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// The final state is published before `tx` drops, so a closed chunk
/// channel always finds it set.
async fn read_loop(mut stream: TcpStream, tx: mpsc::Sender<Vec<u8>>, closed: watch::Sender<LinkState>) {
    let mut buf = [0u8; READ_BUFFER];
    let end = loop {
        match stream.read(&mut buf).await {
            Ok(0) => break LinkState::Closed,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break LinkState::Closed;
                }
            }
            Err(e) => {
                log::warn!("Read failed: {}", e);
                break LinkState::Lost(e.to_string());
            }
        }
    };
    closed.send_replace(end);
    drop(tx);
}

#[async_trait]
impl Session for TcpSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| TransportError::Subscribe("already subscribed".to_string()))?;
        let closed = self
            .closed_tx
            .take()
            .ok_or_else(|| TransportError::Subscribe("session already closed".to_string()))?;

        let (tx, rx) = mpsc::channel(CHUNK_QUEUE);
        self.reader = Some(tokio::spawn(read_loop(stream, tx, closed)));
        Ok(rx)
    }

    async fn wait_disconnect(&self) -> Result<(), TransportError> {
        let mut closed = self.closed_rx.clone();
        // An aborted reader drops the sender, which also ends the wait
        let state = match closed.wait_for(|state| *state != LinkState::Open).await {
            Ok(state) => state.clone(),
            Err(_) => LinkState::Closed,
        };
        match state {
            LinkState::Lost(reason) => Err(TransportError::LinkLost(reason)),
            _ => Ok(()),
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        self.stop_reader();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stop_reader();
        self.stream = None;
        self.closed_tx = None;
        Ok(())
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
