//! Link-resilient stream consumer.
//!
//! `StreamManager` drives one transport through
//! Disconnected -> Scanning -> Connecting -> Streaming and back, forwarding
//! reassembled text lines downstream until shutdown. Every wait is raced
//! against the shutdown signal.

pub mod backoff;
#[cfg(feature = "ble")]
pub mod ble;
pub mod reassembly;
pub mod tcp;
pub mod transport;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::error::TransportError;
use crate::shutdown::Shutdown;

pub use backoff::{Backoff, BackoffConfig};
pub use reassembly::LineAssembler;
pub use transport::{Advertisement, Session, Transport};

/// Extra time a transport gets on top of the scan window
const SCAN_GRACE: Duration = Duration::from_secs(2);

/// Bound on unsubscribe + close during teardown
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a closed chunk channel waits for the session to say why
const LINK_SETTLE: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Streaming,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Line(String),
    State(ConnectionState),
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Advertised name to look for when no address is known
    pub name: Option<String>,
    /// Fixed address, skips discovery entirely
    pub address: Option<String>,
    pub scan_window: Duration,
    /// Bound on connect and on subscribe
    pub connect_timeout: Duration,
    pub backoff: BackoffConfig,
    /// Tear down a streaming session that stays quiet this long
    pub silence_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: None,
            address: None,
            scan_window: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            silence_timeout: None,
        }
    }
}

/// Exact name match first, then case-insensitive substring.
pub fn select_candidate<'a>(adverts: &'a [Advertisement], name: &str) -> Option<&'a Advertisement> {
    adverts
        .iter()
        .find(|advert| advert.name.as_deref() == Some(name))
        .or_else(|| {
            let needle = name.to_lowercase();
            adverts.iter().find(|advert| {
                advert
                    .name
                    .as_ref()
                    .map_or(false, |n| n.to_lowercase().contains(&needle))
            })
        })
}

/// How one pass through the state machine ended.
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    NotFound,
    /// Remote closed a stream that was running
    Disconnected { address: String },
    /// Anything else. The remembered address is dropped.
    Failed { error: TransportError, streamed: bool },
}

pub struct StreamManager<T: Transport> {
    transport: T,
    config: StreamConfig,
    events: mpsc::Sender<StreamEvent>,
    state: ConnectionState,
    backoff: Backoff,
    assembler: LineAssembler,
    remembered: Option<String>,
}

impl<T: Transport> StreamManager<T> {
    pub fn new(transport: T, config: StreamConfig, events: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            transport,
            backoff: Backoff::new(config.backoff.clone()),
            config,
            events,
            state: ConnectionState::Disconnected,
            assembler: LineAssembler::new(),
            remembered: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn remembered_address(&self) -> Option<&str> {
        self.remembered.as_deref()
    }

    pub fn pending_bytes(&self) -> usize {
        self.assembler.pending().len()
    }

    /// Connect, stream, and reconnect until shutdown.
    pub async fn run(&mut self, shutdown: &Shutdown) {
        log::info!(
            "Stream manager started (name: {}, address: {})",
            self.config.name.as_deref().unwrap_or("-"),
            self.config.address.as_deref().unwrap_or("-")
        );

        while !shutdown.is_shutdown() {
            let streamed = match self.run_session(shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::NotFound => {
                    log::warn!(
                        "No device matching {:?} found",
                        self.config.name.as_deref().unwrap_or_default()
                    );
                    false
                }
                SessionEnd::Disconnected { address } => {
                    log::info!("Device {} disconnected", address);
                    self.remembered = Some(address);
                    true
                }
                SessionEnd::Failed { error, streamed } => {
                    log::warn!("Session failed: {}", error);
                    if let Some(address) = self.remembered.take() {
                        log::debug!("Forgetting {}, next attempt rescans", address);
                    }
                    streamed
                }
            };

            if self.set_state(ConnectionState::Disconnected).await.is_err() {
                break;
            }
            if streamed {
                self.backoff.reset();
            }

            let delay = self.backoff.next_delay();
            log::info!(
                "Retrying in {:.2}s (attempt {})",
                delay.as_secs_f64(),
                self.backoff.attempts()
            );
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        let _ = self.set_state(ConnectionState::Disconnected).await;
        log::info!("Stream manager stopped");
    }

    async fn run_session(&mut self, shutdown: &Shutdown) -> SessionEnd {
        let address = match self.resolve_target(shutdown).await {
            Ok(address) => address,
            Err(end) => return end,
        };

        if let Err(end) = self.set_state(ConnectionState::Connecting).await {
            return end;
        }
        log::info!("Connecting to {}", address);
        let connected = tokio::select! {
            result = time::timeout(self.config.connect_timeout, self.transport.connect(&address)) => result,
            _ = shutdown.cancelled() => return SessionEnd::Shutdown,
        };
        let mut session = match connected {
            Ok(Ok(session)) => session,
            Ok(Err(error)) => return SessionEnd::Failed { error, streamed: false },
            Err(_) => {
                return SessionEnd::Failed {
                    error: TransportError::Timeout("connecting"),
                    streamed: false,
                }
            }
        };

        let subscribed = tokio::select! {
            result = time::timeout(self.config.connect_timeout, session.subscribe()) => Some(result),
            _ = shutdown.cancelled() => None,
        };
        let chunks = match subscribed {
            Some(Ok(Ok(chunks))) => chunks,
            Some(Ok(Err(error))) => {
                Self::teardown(&mut session, false).await;
                return SessionEnd::Failed { error, streamed: false };
            }
            Some(Err(_)) => {
                Self::teardown(&mut session, false).await;
                return SessionEnd::Failed {
                    error: TransportError::Timeout("subscribing"),
                    streamed: false,
                };
            }
            None => {
                Self::teardown(&mut session, false).await;
                return SessionEnd::Shutdown;
            }
        };

        if let Err(end) = self.set_state(ConnectionState::Streaming).await {
            Self::teardown(&mut session, true).await;
            return end;
        }

        let end = self.stream(&session, chunks, &address, shutdown).await;
        let subscribed = !matches!(end, SessionEnd::Disconnected { .. });
        Self::teardown(&mut session, subscribed).await;
        end
    }

    /// Configured address, else the remembered one, else a scan.
    async fn resolve_target(&mut self, shutdown: &Shutdown) -> Result<String, SessionEnd> {
        if let Some(address) = self.config.address.clone().or_else(|| self.remembered.clone()) {
            return Ok(address);
        }
        let name = self.config.name.clone().ok_or(SessionEnd::NotFound)?;

        self.set_state(ConnectionState::Scanning).await?;
        let window = self.config.scan_window;
        let scanned = tokio::select! {
            result = time::timeout(window + SCAN_GRACE, self.transport.scan(window)) => result,
            _ = shutdown.cancelled() => return Err(SessionEnd::Shutdown),
        };
        let adverts = match scanned {
            Ok(Ok(adverts)) => adverts,
            Ok(Err(error)) => return Err(SessionEnd::Failed { error, streamed: false }),
            Err(_) => {
                return Err(SessionEnd::Failed {
                    error: TransportError::Timeout("scanning"),
                    streamed: false,
                })
            }
        };
        log::debug!("Scan saw {} device(s)", adverts.len());

        match select_candidate(&adverts, &name) {
            Some(advert) => {
                log::info!(
                    "Found {} at {}",
                    advert.name.as_deref().unwrap_or("?"),
                    advert.address
                );
                Ok(advert.address.clone())
            }
            None => Err(SessionEnd::NotFound),
        }
    }

    /// Race chunks, remote disconnect, shutdown and the silence watchdog.
    async fn stream(
        &mut self,
        session: &T::Session,
        mut chunks: mpsc::Receiver<Vec<u8>>,
        address: &str,
        shutdown: &Shutdown,
    ) -> SessionEnd {
        let disconnected = session.wait_disconnect();
        tokio::pin!(disconnected);

        let silence = self.config.silence_timeout;
        let mut last_chunk = Instant::now();

        loop {
            let watchdog = async move {
                match silence {
                    Some(limit) => time::sleep_until(last_chunk + limit).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                chunk = chunks.recv() => match chunk {
                    Some(bytes) => {
                        last_chunk = Instant::now();
                        if !self.forward(&bytes).await {
                            return SessionEnd::Shutdown;
                        }
                    }
                    None => {
                        let result = time::timeout(LINK_SETTLE, &mut disconnected)
                            .await
                            .unwrap_or(Ok(()));
                        return Self::link_end(result, address);
                    }
                },
                result = &mut disconnected => return Self::link_end(result, address),
                _ = shutdown.cancelled() => return SessionEnd::Shutdown,
                _ = watchdog => {
                    let secs = silence.map_or(0.0, |limit| limit.as_secs_f64());
                    return SessionEnd::Failed {
                        error: TransportError::Silent(secs),
                        streamed: true,
                    };
                }
            }
        }
    }

    fn link_end(result: Result<(), TransportError>, address: &str) -> SessionEnd {
        match result {
            Ok(()) => SessionEnd::Disconnected {
                address: address.to_string(),
            },
            Err(error) => SessionEnd::Failed {
                error,
                streamed: true,
            },
        }
    }

    /// Reassemble and pass lines on. False once the consumer is gone.
    async fn forward(&mut self, bytes: &[u8]) -> bool {
        for line in self.assembler.push(bytes) {
            if self.events.send(StreamEvent::Line(line)).await.is_err() {
                log::warn!("Line consumer closed, stopping stream");
                return false;
            }
        }
        true
    }

    async fn set_state(&mut self, state: ConnectionState) -> Result<(), SessionEnd> {
        if self.state == state {
            return Ok(());
        }
        log::info!("Link {} -> {}", self.state, state);
        self.state = state;
        self.events
            .send(StreamEvent::State(state))
            .await
            .map_err(|_| SessionEnd::Shutdown)
    }

    async fn teardown(session: &mut T::Session, unsubscribe: bool) {
        let address = session.address().to_string();
        let result = time::timeout(TEARDOWN_TIMEOUT, async {
            if unsubscribe {
                if let Err(e) = session.unsubscribe().await {
                    log::debug!("Unsubscribe from {} failed: {}", address, e);
                }
            }
            session.close().await
        })
        .await;

        match result {
            Ok(Ok(())) => log::debug!("Session to {} closed", address),
            Ok(Err(e)) => log::warn!("Closing {} failed: {}", address, e),
            Err(_) => log::warn!("Closing {} timed out", address),
        }
    }
}
