//! BLE heart-rate source: scan for a Heart Rate peripheral, subscribe to
//! its measurement characteristic, and keep only the most recent sample.

use std::sync::{Arc, Mutex};
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::HeartRateError;

/**
 * Bluetooth SIG Heart Rate service.
 */
pub const HEART_RATE_SERVICE: &str = "0000180d-0000-1000-8000-00805f9b34fb";

/**
 * Heart Rate Measurement characteristic (notifications).
 */
pub const HEART_RATE_MEASUREMENT: &str = "00002a37-0000-1000-8000-00805f9b34fb";

/**
 * How long (seconds) to scan before giving up with "no device found".
 */
pub const DEFAULT_SCAN_SECS: u64 = 15;

/**
 * How often (milliseconds) to poll the adapters for scan results.
 */
const SCAN_POLL_DELAY: u64 = 500;

const EVENT_CHANNEL_SIZE: usize = 64;

pub fn make_heart_rate_service_uuid() -> Uuid {
    Uuid::parse_str(HEART_RATE_SERVICE).unwrap()
}

pub fn make_heart_rate_measurement_uuid() -> Uuid {
    Uuid::parse_str(HEART_RATE_MEASUREMENT).unwrap()
}

/// Single-slot cell holding the most recent sample in bpm. One producer
/// (the subscription task), last write wins.
pub type HeartRateCell = Arc<Mutex<Option<u16>>>;

pub fn new_heart_rate_cell() -> HeartRateCell {
    Arc::new(Mutex::new(None))
}

#[derive(Debug, Clone)]
pub enum HeartRateEvent {
    Status(String),
    Sample(u16),
}

/// Decode one Heart Rate Measurement frame. Bit 0 of the flags byte
/// selects the u8 or u16 little-endian value format.
pub fn parse_heart_rate(data: &[u8]) -> Option<u16> {
    let flags = *data.first()?;

    if flags & 0x01 != 0 {
        if data.len() >= 3 {
            Some(u16::from_le_bytes([data[1], data[2]]))
        } else {
            None
        }
    } else {
        data.get(1).map(|byte| *byte as u16)
    }
}

pub struct HeartRateMonitor {
    scan_deadline: Duration,
    cell: HeartRateCell,
    cancel: Mutex<Option<CancellationToken>>,
    senders: Arc<Mutex<Vec<Sender<HeartRateEvent>>>>,
}

impl HeartRateMonitor {
    pub fn new(scan_secs: u64) -> Self {
        HeartRateMonitor {
            scan_deadline: Duration::from_secs(scan_secs),
            cell: new_heart_rate_cell(),
            cancel: Mutex::new(None),
            senders: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared cell the emergency flow reads the latest bpm from.
    pub fn cell(&self) -> HeartRateCell {
        self.cell.clone()
    }

    pub fn latest_bpm(&self) -> Option<u16> {
        *self.cell.lock().expect("Failed to lock heart rate cell")
    }

    pub fn subscribe(&self) -> Receiver<HeartRateEvent> {
        let (sender, receiver) = channel::<HeartRateEvent>(EVENT_CHANNEL_SIZE);
        self.senders.lock().expect("Failed to lock heart rate senders").push(sender);
        receiver
    }

    /// Begin the discovery-then-subscribe sequence. Any prior link is torn
    /// down first.
    pub fn connect(&self) {
        self.disconnect();

        let cancel = CancellationToken::new();
        {
            let mut slot = self.cancel.lock().expect("Failed to lock heart rate cancel");
            *slot = Some(cancel.clone());
        }

        let scan_deadline = self.scan_deadline;
        let cell = self.cell.clone();
        let senders = self.senders.clone();

        spawn(async move {
            run_monitor(cancel, scan_deadline, cell, senders).await;
        });
    }

    /// Cancel discovery/subscription and release the link. Idempotent.
    pub fn disconnect(&self) {
        let token = self.cancel.lock().expect("Failed to lock heart rate cancel").take();

        if let Some(token) = token {
            token.cancel();
            self.broadcast_sync(HeartRateEvent::Status("BLE: déconnecté".to_string()));
        }

        let mut cell = self.cell.lock().expect("Failed to lock heart rate cell");
        *cell = None;
    }

    fn broadcast_sync(&self, event: HeartRateEvent) {
        let mut senders = self.senders.lock().expect("Failed to lock heart rate senders");
        senders.retain_mut(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(err) if err.is_disconnected() => false,
            Err(_) => true,
        });
    }
}

async fn broadcast(senders: &Arc<Mutex<Vec<Sender<HeartRateEvent>>>>, event: HeartRateEvent) {
    let mut targets = {
        let senders = senders.lock().expect("Failed to lock heart rate senders");
        senders.clone()
    };

    for sender in &mut targets {
        if let Err(err) = sender.send(event.clone()).await {
            debug!("Failed to deliver heart rate event: {}", err);
        }
    }
}

async fn status(senders: &Arc<Mutex<Vec<Sender<HeartRateEvent>>>>, text: &str) {
    info!("{}", text);
    broadcast(senders, HeartRateEvent::Status(text.to_string())).await;
}

async fn start_scanning(adapters: &Vec<Adapter>) -> Result<(), btleplug::Error> {
    let filter = ScanFilter {
        services: vec![make_heart_rate_service_uuid()],
    };

    for adapter in adapters {
        info!(
            "Scanning for heart rate sensor using adapter {}...",
            adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()),
        );
        adapter.start_scan(filter.clone()).await?;
    }

    Ok(())
}

async fn find_peripheral(adapters: &Vec<Adapter>) -> Option<Peripheral> {
    let service_uuid = make_heart_rate_service_uuid();

    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(peripherals) => peripherals,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            match peripheral.properties().await {
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                },
                Ok(None) => {},
                Ok(Some(properties)) => {
                    // Some environments ignore the filter, so check the service uuid again
                    if properties.services.contains(&service_uuid) {
                        info!(
                            "Using peripheral {} {:?}",
                            properties.address,
                            properties.local_name.unwrap_or(String::from("NONE")),
                        );
                        return Some(peripheral);
                    }
                },
            }
        }
    }

    None
}

async fn stop_scanning(adapters: &Vec<Adapter>) {
    for adapter in adapters {
        if let Err(err) = adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", err);
        }
    }
}

async fn subscribe_measurement(peripheral: &Peripheral) -> Result<(), HeartRateError> {
    let service_uuid = make_heart_rate_service_uuid();
    let measurement_uuid = make_heart_rate_measurement_uuid();

    peripheral.connect().await?;
    peripheral.discover_services().await?;

    for service in peripheral.services() {
        if !service.uuid.eq(&service_uuid) {
            continue;
        }

        for characteristic in &service.characteristics {
            if characteristic.uuid.eq(&measurement_uuid) {
                info!("Subscribing to characteristic {:?}", characteristic.uuid);
                peripheral.subscribe(characteristic).await?;
                return Ok(());
            }
        }
    }

    Err(HeartRateError::MissingCharacteristic)
}

async fn run_monitor(
    cancel: CancellationToken,
    scan_deadline: Duration,
    cell: HeartRateCell,
    senders: Arc<Mutex<Vec<Sender<HeartRateEvent>>>>,
) {
    let manager = match Manager::new().await {
        Ok(manager) => manager,
        Err(err) => {
            warn!("Failed to create BLE manager: {}", err);
            status(&senders, "BLE: scanner indisponible").await;
            return;
        },
    };

    let adapters = match manager.adapters().await {
        Ok(adapters) => adapters,
        Err(err) => {
            warn!("Failed to enumerate BLE adapters: {}", err);
            status(&senders, "BLE: Bluetooth désactivé").await;
            return;
        },
    };

    if adapters.is_empty() {
        status(&senders, "BLE: Bluetooth désactivé").await;
        return;
    }

    status(&senders, "BLE: scan…").await;

    if let Err(err) = start_scanning(&adapters).await {
        warn!("Scanning failed: {:?}", err);

        if let btleplug::Error::PermissionDenied = err {
            status(&senders, "BLE: permissions manquantes").await;
        } else {
            status(&senders, "BLE: scan indisponible").await;
        }
        return;
    }

    let deadline = Instant::now() + scan_deadline;
    let peripheral = loop {
        if let Some(peripheral) = find_peripheral(&adapters).await {
            break Some(peripheral);
        }

        if Instant::now() >= deadline {
            break None;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                stop_scanning(&adapters).await;
                return;
            },
            _ = sleep(Duration::from_millis(SCAN_POLL_DELAY)) => {},
        }
    };

    stop_scanning(&adapters).await;

    let peripheral = match peripheral {
        Some(peripheral) => peripheral,
        None => {
            status(&senders, "BLE: aucun périphérique trouvé").await;
            return;
        },
    };

    status(&senders, "BLE: connexion…").await;

    if let Err(err) = subscribe_measurement(&peripheral).await {
        warn!("Connecting to heart rate sensor failed: {:?}", err);
        status(&senders, "BLE: erreur connexion").await;
        let _ = peripheral.disconnect().await;
        return;
    }

    status(&senders, "BLE: connecté").await;

    let mut notification_stream = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(err) => {
            warn!("Failed to open notification stream: {:?}", err);
            status(&senders, "BLE: erreur connexion").await;
            let _ = peripheral.disconnect().await;
            return;
        },
    };

    let measurement_uuid = make_heart_rate_measurement_uuid();

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            notification = notification_stream.next() => match notification {
                Some(data) => {
                    if !data.uuid.eq(&measurement_uuid) {
                        continue;
                    }

                    match parse_heart_rate(&data.value) {
                        Some(bpm) => {
                            {
                                let mut slot = cell.lock().expect("Failed to lock heart rate cell");
                                *slot = Some(bpm);
                            }
                            broadcast(&senders, HeartRateEvent::Sample(bpm)).await;
                        },
                        None => warn!("Failed to decode heart rate frame: {:?}", data.value),
                    }
                },
                None => {
                    status(&senders, "BLE: déconnecté").await;
                    break 'mainloop;
                },
            },
        }
    }

    if let Err(err) = peripheral.disconnect().await {
        debug!("Failed to disconnect peripheral: {}", err);
    }
}
