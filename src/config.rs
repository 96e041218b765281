use anyhow::{Context, Result};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use ota_core::OtaConfig;
use serde::{Deserialize, Serialize};

const CONFIG_NAMESPACE: &str = "ota_agent";
const CONFIG_KEY: &str = "config";
const MAX_CONFIG_SIZE: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    // Backend credentials
    pub device_id: String,
    pub api_key: String,

    pub log_level: String,

    pub ota: OtaConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        // Compiled-in values set by build.rs from device_config.h, which
        // should NOT be committed to git
        let ota = OtaConfig {
            api_endpoint: env!("API_ENDPOINT").to_string(),
            ..OtaConfig::default()
        };

        Self {
            wifi_ssid: env!("WIFI_SSID").to_string(),
            wifi_password: env!("WIFI_PASSWORD").to_string(),
            device_id: env!("DEVICE_ID").to_string(),
            api_key: env!("API_KEY").to_string(),
            log_level: "info".to_string(),
            ota,
        }
    }
}

/// NVS-backed configuration blob. The default NVS partition can only be
/// taken once, so the store is opened once at boot and reused.
pub struct ConfigStore {
    nvs: EspNvs<NvsDefault>,
}

impl ConfigStore {
    pub fn open(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, CONFIG_NAMESPACE, true)
            .context("Failed to open config namespace")?;
        Ok(Self { nvs })
    }

    pub fn load_or_default(&mut self) -> AgentConfig {
        match self.load() {
            Ok(mut config) => {
                log::info!("Loaded configuration from NVS");

                // Empty credentials in NVS fall back to the compiled-in ones
                let defaults = AgentConfig::default();
                let mut patched = false;
                if config.wifi_ssid.is_empty() {
                    log::warn!("NVS WiFi credentials empty, using compiled defaults: SSID='{}'", defaults.wifi_ssid);
                    config.wifi_ssid = defaults.wifi_ssid;
                    config.wifi_password = defaults.wifi_password;
                    patched = true;
                }
                if config.api_key.is_empty() {
                    log::warn!("NVS API key empty, using compiled default");
                    config.api_key = defaults.api_key;
                    patched = true;
                }
                if patched {
                    if let Err(e) = self.save(&config) {
                        log::warn!("Failed to save patched config: {:?}", e);
                    }
                }

                config
            }
            Err(e) => {
                log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
                let config = AgentConfig::default();

                if let Err(save_err) = self.save(&config) {
                    log::warn!("Failed to save default config to NVS: {:?}", save_err);
                }

                config
            }
        }
    }

    pub fn save(&mut self, config: &AgentConfig) -> Result<()> {
        let json = serde_json::to_vec(config)?;
        self.nvs.set_blob(CONFIG_KEY, &json)?;
        log::info!("Configuration saved to NVS");
        Ok(())
    }

    fn load(&self) -> Result<AgentConfig> {
        let mut buf = vec![0u8; MAX_CONFIG_SIZE];
        let data = self
            .nvs
            .get_blob(CONFIG_KEY, &mut buf)?
            .ok_or_else(|| anyhow::anyhow!("Config not found in NVS"))?;

        let config: AgentConfig = serde_json::from_slice(data)?;
        Ok(config)
    }
}
