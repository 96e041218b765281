use anyhow::{bail, Result};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};
use std::time::{Duration, Instant};

const RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

pub struct WifiManager {
    wifi: BlockingWifi<EspWifi<'static>>,
    ssid: String,
    last_attempt: Option<Instant>,
}

impl WifiManager {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        ssid: String,
        password: String,
    ) -> Result<Self> {
        log::info!("Initializing WiFi manager for SSID: '{}'", ssid);

        if ssid.is_empty() {
            log::error!("WiFi SSID is empty! Check device_config.h");
            bail!("WiFi SSID cannot be empty");
        }

        let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;

        let cfg = Configuration::Client(ClientConfiguration {
            ssid: ssid.as_str().try_into().map_err(|e| {
                log::error!("Failed to convert SSID '{}': {:?}", ssid, e);
                anyhow::anyhow!("Invalid SSID format: {}", ssid)
            })?,
            password: password
                .as_str()
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid password format"))?,
            auth_method: if password.is_empty() {
                log::warn!("WiFi password is empty, using open network");
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });
        esp_wifi.set_configuration(&cfg)?;

        let wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

        Ok(Self {
            wifi,
            ssid,
            last_attempt: None,
        })
    }

    pub fn connect(&mut self) -> Result<()> {
        self.last_attempt = Some(Instant::now());

        if !self.wifi.is_started()? {
            log::info!("Starting WiFi...");
            self.wifi.start()?;
        }

        log::info!("Connecting to {}...", self.ssid);
        self.wifi.connect()?;

        log::info!("Waiting for DHCP...");
        self.wifi.wait_netif_up()?;

        log::info!("WiFi connected, IP: {}", self.get_ip().unwrap_or_default());

        // Power save drops long downloads on some access points
        unsafe {
            use esp_idf_sys::*;
            let result = esp_wifi_set_ps(wifi_ps_type_t_WIFI_PS_NONE);
            if result != ESP_OK {
                log::warn!("Failed to set WiFi power save mode: {:?}", result);
            }
        }

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && super::station_has_ip()
    }

    /// Reconnects after a drop, at most once per `RECONNECT_INTERVAL`.
    pub fn ensure_connected(&mut self) {
        if self.is_connected() {
            return;
        }
        let due = self
            .last_attempt
            .map(|at| at.elapsed() >= RECONNECT_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }

        log::warn!("WiFi disconnected, reconnecting to {}", self.ssid);
        if let Err(e) = self.wifi.disconnect() {
            log::debug!("Disconnect before reconnect failed: {:?}", e);
        }
        if let Err(e) = self.connect() {
            log::warn!("WiFi reconnect failed: {:?}", e);
        }
    }

    pub fn get_ip(&self) -> Option<String> {
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|ip_info| format!("{}", ip_info.ip))
    }
}
