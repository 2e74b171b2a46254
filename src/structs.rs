use btleplug::platform::Peripheral;
use std::collections::HashMap;
use uuid::Uuid;

/// A discovered BLE device, as accumulated from advertisement events.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub tx_power: String,
    pub address: String,
    pub rssi: String,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub services: Vec<Uuid>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub device: Option<Peripheral>,
}

impl DeviceInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        name: Option<String>,
        tx_power: Option<i16>,
        address: String,
        rssi: Option<i16>,
        manufacturer_data: HashMap<u16, Vec<u8>>,
        services: Vec<Uuid>,
        service_data: HashMap<Uuid, Vec<u8>>,
        device: Peripheral,
    ) -> Self {
        Self {
            id,
            name: name.unwrap_or_else(|| "Unknown".to_string()),
            tx_power: tx_power.map_or_else(|| "N/A".to_string(), |tx| tx.to_string()),
            address,
            rssi: rssi.map_or_else(|| "N/A".to_string(), |rssi| rssi.to_string()),
            manufacturer_data,
            services,
            service_data,
            device: Some(device),
        }
    }
}
