use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::TransportError;
use crate::stream::transport::{Advertisement, CloseGuard, Session, Transport};

/// Nordic UART service, TX from the producer's point of view
pub const UART_RX_CHARACTERISTIC: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Discovery time spent looking for a fixed address that is not cached yet
const ADDRESS_LOOKUP_WINDOW: Duration = Duration::from_secs(3);

const CHUNK_QUEUE: usize = 256;

/// BLE link through the first available adapter.
#[derive(Clone)]
pub struct BleTransport {
    adapter: Adapter,
}

impl BleTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::AdapterUnavailable("no Bluetooth adapter found".to_string()))?;
        Ok(Self { adapter })
    }

    async fn discover(&self, window: Duration) -> Result<Vec<Peripheral>, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?;
        tokio::time::sleep(window).await;
        if let Err(e) = self.adapter.stop_scan().await {
            log::debug!("Stopping scan failed: {}", e);
        }
        self.adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))
    }

    async fn find(&self, address: &str) -> Result<Option<Peripheral>, TransportError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Session = BleSession;

    async fn scan(&self, window: Duration) -> Result<Vec<Advertisement>, TransportError> {
        let mut adverts = Vec::new();
        for peripheral in self.discover(window).await? {
            let name = match peripheral.properties().await {
                Ok(Some(props)) => props.local_name,
                _ => None,
            };
            adverts.push(Advertisement {
                name,
                address: peripheral.address().to_string(),
            });
        }
        Ok(adverts)
    }

    async fn connect(&self, address: &str) -> Result<BleSession, TransportError> {
        let peripheral = match self.find(address).await? {
            Some(peripheral) => peripheral,
            None => {
                self.discover(ADDRESS_LOOKUP_WINDOW).await?;
                self.find(address)
                    .await?
                    .ok_or_else(|| TransportError::Connect(format!("{} not in range", address)))?
            }
        };

        // Until a session owns the peripheral, dropping this future disconnects it
        let link = CloseGuard::new({
            let peripheral = peripheral.clone();
            move || {
                tokio::spawn(async move {
                    if let Err(e) = peripheral.disconnect().await {
                        log::debug!("Disconnecting abandoned link failed: {}", e);
                    }
                });
            }
        });

        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if let Err(e) = peripheral.discover_services().await {
            link.disarm();
            if let Err(close) = peripheral.disconnect().await {
                log::debug!("Disconnect after failed discovery: {}", close);
            }
            return Err(TransportError::Connect(e.to_string()));
        }

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == UART_RX_CHARACTERISTIC);

        link.disarm();
        Ok(BleSession {
            address: address.to_string(),
            adapter: self.adapter.clone(),
            peripheral,
            characteristic,
            forwarder: None,
        })
    }
}

pub struct BleSession {
    address: String,
    adapter: Adapter,
    peripheral: Peripheral,
    characteristic: Option<Characteristic>,
    forwarder: Option<JoinHandle<()>>,
}

#[async_trait]
impl Session for BleSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, TransportError> {
        let characteristic = self.characteristic.clone().ok_or_else(|| {
            TransportError::Subscribe(format!("{} has no UART RX characteristic", self.address))
        })?;

        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(CHUNK_QUEUE);
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != UART_RX_CHARACTERISTIC {
                    continue;
                }
                if tx.send(notification.value).await.is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    /// The adapter reports every disconnect the same way, so all of them
    /// count as orderly and the address is kept.
    async fn wait_disconnect(&self) -> Result<(), TransportError> {
        let mut events = match self.adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                log::warn!("Adapter events unavailable: {}", e);
                return std::future::pending().await;
            }
        };
        if !self.peripheral.is_connected().await.unwrap_or(false) {
            return Ok(());
        }
        let id = self.peripheral.id();
        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDisconnected(gone) = event {
                if gone == id {
                    return Ok(());
                }
            }
        }
        Err(TransportError::LinkLost("adapter event stream ended".to_string()))
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(characteristic) = &self.characteristic {
            self.peripheral
                .unsubscribe(characteristic)
                .await
                .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))
    }
}
