use crate::config::Config;
use crate::error::MonitorError;
use btleplug::api::{
    bleuuid::uuid_from_u16, Central, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use uuid::Uuid;

pub const HEART_RATE_SERVICE_UUID: Uuid = uuid_from_u16(0x180D);
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2A37);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothDevice {
    pub id: String,
    pub name: String,
}

impl BluetoothDevice {
    pub fn new(id: String, name: String) -> Self {
        Self { id, name }
    }
}

impl std::fmt::Display for BluetoothDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Whether advertised properties name the Heart Rate Service and pass the name filter
pub fn is_heart_rate_monitor(props: &PeripheralProperties, config: &Config) -> bool {
    props.services.contains(&HEART_RATE_SERVICE_UUID) && config.matches_name(props.local_name.as_deref())
}

/// Resolve the configured Bluetooth adapter
pub async fn open_adapter(config: &Config) -> Result<Adapter, MonitorError> {
    let manager = Manager::new()
        .await
        .map_err(|e| MonitorError::ManagerInit(e.to_string()))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| MonitorError::ManagerInit(e.to_string()))?;

    adapters
        .into_iter()
        .nth(config.adapter_index)
        .ok_or(MonitorError::NoAdapter)
}

/// Scans for devices advertising the Heart Rate Service
pub async fn scan_devices(
    adapter: &Adapter,
    config: &Config,
) -> Result<Vec<(BluetoothDevice, Peripheral)>, MonitorError> {
    let filter = ScanFilter {
        services: vec![HEART_RATE_SERVICE_UUID],
    };

    adapter
        .start_scan(filter)
        .await
        .map_err(|e| MonitorError::Scan(e.to_string()))?;

    log::info!("Scanning for heart rate monitors for {}s", config.scan_timeout_secs);
    tokio::time::sleep(config.scan_timeout()).await;

    if let Err(e) = adapter.stop_scan().await {
        log::warn!("Failed to stop scan: {}", e);
    }

    let peripherals = adapter
        .peripherals()
        .await
        .map_err(|e| MonitorError::Scan(e.to_string()))?;

    let mut devices = Vec::new();

    for peripheral in peripherals {
        // Some backends ignore the scan filter, so check the advertisement too
        if let Ok(Some(props)) = peripheral.properties().await {
            if is_heart_rate_monitor(&props, config) {
                let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
                let device = BluetoothDevice::new(peripheral.address().to_string(), name);
                log::debug!("Found heart rate monitor: {}", device);
                devices.push((device, peripheral));
            }
        }
    }

    Ok(devices)
}

/// First device advertising the Heart Rate Service, or `DeviceNotFound`
pub async fn find_heart_rate_monitor(
    adapter: &Adapter,
    config: &Config,
) -> Result<(BluetoothDevice, Peripheral), MonitorError> {
    scan_devices(adapter, config)
        .await?
        .into_iter()
        .next()
        .ok_or(MonitorError::DeviceNotFound)
}
