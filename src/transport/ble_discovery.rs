//! BLE device discovery for finding the keypad
//!
//! Candidates are ranked: known addresses first, then the configured name
//! prefix, then the stock "Macropad" prefix, then anything advertising the
//! keypad's UART service. Ties go to the strongest signal.

use crate::config::BleConfig;
use crate::error::ConnectError;
use bluer::{Adapter, Address, Device, Uuid};
use keypad_link_shared::ble;
use std::collections::HashSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How well a discovered device matches what we are looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchRank {
    KnownAddress,
    ConfiguredPrefix,
    DefaultPrefix,
    AdvertisesService,
}

/// A device seen during the scan
#[derive(Debug, Clone)]
pub struct KeypadCandidate {
    pub address: Address,
    pub name: Option<String>,
    pub rank: MatchRank,
    pub rssi: Option<i16>,
}

/// Rank a device by its advertisement, or `None` if it is not a keypad
pub fn rank_device(
    name: Option<&str>,
    services: &HashSet<Uuid>,
    known: bool,
    prefix: &str,
) -> Option<MatchRank> {
    if known {
        return Some(MatchRank::KnownAddress);
    }
    if let Some(name) = name {
        if !prefix.is_empty() && name.starts_with(prefix) {
            return Some(MatchRank::ConfiguredPrefix);
        }
        if name.starts_with(ble::DEFAULT_NAME_PREFIX) {
            return Some(MatchRank::DefaultPrefix);
        }
    }
    if services.contains(&Uuid::from_u128(ble::SERVICE_UUID)) {
        return Some(MatchRank::AdvertisesService);
    }
    None
}

/// Order candidates best first
pub fn sort_candidates(candidates: &mut [KeypadCandidate]) {
    candidates.sort_by(|a, b| {
        a.rank.cmp(&b.rank).then_with(|| {
            let rssi_a = a.rssi.unwrap_or(i16::MIN);
            let rssi_b = b.rssi.unwrap_or(i16::MIN);
            rssi_b.cmp(&rssi_a)
        })
    });
}

/// BLE discovery service
pub struct BleDiscovery {
    config: BleConfig,
    known: Vec<Address>,
}

impl BleDiscovery {
    pub fn new(config: BleConfig) -> Self {
        let known = config
            .known_addresses
            .iter()
            .filter_map(|s| match s.parse::<Address>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!("[BLE] Ignoring invalid address {}: {}", s, e);
                    None
                }
            })
            .collect();
        Self { config, known }
    }

    /// Get the default adapter, powered on
    pub async fn get_adapter() -> Result<Adapter, ConnectError> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| map_bluer_error(e, "Bluetooth session"))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| map_bluer_error(e, "Bluetooth adapter"))?;
        adapter
            .set_powered(true)
            .await
            .map_err(|e| map_bluer_error(e, "Bluetooth adapter"))?;
        Ok(adapter)
    }

    /// Scan for keypads, best candidate first
    pub async fn discover(&self, adapter: &Adapter) -> Result<Vec<KeypadCandidate>, ConnectError> {
        let mut candidates = Vec::new();
        let mut seen: HashSet<Address> = HashSet::new();

        // Known devices the stack already holds need no scan
        for &addr in &self.known {
            if let Ok(device) = adapter.device(addr) {
                if let Some(candidate) = self.inspect(&device).await {
                    seen.insert(addr);
                    candidates.push(candidate);
                }
            }
        }
        if !candidates.is_empty() {
            return Ok(candidates);
        }

        let discover = adapter
            .discover_devices()
            .await
            .map_err(|e| map_bluer_error(e, "discovery"))?;
        tokio::pin!(discover);

        let scan_result = timeout(self.config.scan_duration, async {
            use futures::StreamExt;
            while let Some(evt) = discover.next().await {
                let bluer::AdapterEvent::DeviceAdded(addr) = evt else {
                    continue;
                };
                if !seen.insert(addr) {
                    continue;
                }
                let Ok(device) = adapter.device(addr) else {
                    continue;
                };
                if let Some(candidate) = self.inspect(&device).await {
                    debug!("[BLE] Candidate {} ({:?})", addr, candidate.rank);
                    let good_enough = candidate.rank <= MatchRank::ConfiguredPrefix;
                    candidates.push(candidate);
                    if good_enough {
                        break;
                    }
                }
            }
        })
        .await;

        if scan_result.is_err() {
            info!("[BLE] Discovery scan completed");
        }

        sort_candidates(&mut candidates);
        Ok(candidates)
    }

    /// Find the best keypad in range
    pub async fn find_keypad(&self, adapter: &Adapter) -> Result<Device, ConnectError> {
        let candidates = self.discover(adapter).await?;
        let best = candidates.into_iter().next().ok_or_else(|| {
            ConnectError::DeviceNotFound(format!(
                "no device named {}* or advertising the keypad service",
                self.config.name_prefix
            ))
        })?;

        info!(
            "[BLE] Selected {} ({})",
            best.address,
            best.name.as_deref().unwrap_or("unnamed")
        );
        adapter
            .device(best.address)
            .map_err(|e| map_bluer_error(e, "device"))
    }

    async fn inspect(&self, device: &Device) -> Option<KeypadCandidate> {
        let address = device.address();
        let name = device.name().await.ok().flatten();
        let services = device.uuids().await.ok().flatten().unwrap_or_default();
        let known = self.known.contains(&address);

        let rank = rank_device(name.as_deref(), &services, known, &self.config.name_prefix)?;
        Some(KeypadCandidate {
            address,
            name,
            rank,
            rssi: device.rssi().await.ok().flatten(),
        })
    }
}

/// Classify a BlueZ failure into the connect error taxonomy
pub(crate) fn map_bluer_error(err: bluer::Error, context: &str) -> ConnectError {
    let detail = format!("{}: {}", context, err);
    match err.kind {
        bluer::ErrorKind::NotFound => ConnectError::DeviceNotFound(detail),
        // Pairing or bonding required before the GATT link may be used
        bluer::ErrorKind::NotAuthorized => ConnectError::InsecureContext(detail),
        bluer::ErrorKind::NotPermitted => ConnectError::PermissionDenied(detail),
        bluer::ErrorKind::AlreadyConnected | bluer::ErrorKind::InProgress => {
            ConnectError::AlreadyOpen(detail)
        }
        _ => ConnectError::Other(detail),
    }
}
