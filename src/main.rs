use anyhow::{Context, Result};
use esp_idf_hal::prelude::*;
use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
use esp_idf_sys as _; // Binstart
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use log::info;
use ota_core::{
    DeviceIdentity, ForceCheckError, OtaEvent, OtaHandle, OtaState, OtaWorker, UpdateStateMachine,
};

// Generate ESP-IDF app descriptor
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod config;
mod logging;
mod network;
mod ota;
mod system;
mod version;

use crate::network::{EspHttpTransport, WifiManager};
use crate::ota::EspFirmwareSlot;
use crate::system::{BootButton, ButtonEvent, DeviceRestart};

const LOOP_DELAY_MS: u32 = 20;
const WIFI_CHECK_INTERVAL: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    esp_idf_svc::sys::link_patches();

    logging::init_logger().map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;
    info!("{}", version::version_info());
    info!("Boot reason: {}", system::reset::get_reset_reason());
    info!("Free heap: {} bytes", unsafe {
        esp_idf_sys::esp_get_free_heap_size()
    });

    // Booting this far means the image is healthy enough to keep
    if let Err(e) = ota::confirm_running_image() {
        log::warn!("Could not confirm running image: {:?}", e);
    }

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mut store = config::ConfigStore::open(nvs.clone())?;
    let config = store.load_or_default();
    if !logging::set_max_level_from_str(&config.log_level) {
        log::warn!("Unknown log level '{}', keeping info", config.log_level);
    }
    config.ota.validate().context("Invalid OTA configuration")?;
    info!(
        "Device {} -> {} (check every {}s)",
        config.device_id, config.ota.api_endpoint, config.ota.check_interval_secs
    );

    let mut wifi = WifiManager::new(
        peripherals.modem,
        sys_loop,
        nvs,
        config.wifi_ssid.clone(),
        config.wifi_password.clone(),
    )?;
    if let Err(e) = wifi.connect() {
        // The updater skips cycles while offline; the main loop keeps retrying
        log::warn!("Initial WiFi connection failed: {:?}", e);
    }

    let identity = DeviceIdentity::new(
        config.device_id.clone(),
        config.api_key.clone(),
        version::FIRMWARE_VERSION,
    );
    let ota_config = config.ota.clone();
    let (updater, events) = OtaWorker::spawn(
        config.ota.worker_poll(),
        ota_core::worker::DEFAULT_STACK_SIZE,
        move |sink| -> Result<_> {
            let transport = EspHttpTransport::new(&ota_config);
            let slot = EspFirmwareSlot::new()?;
            Ok(UpdateStateMachine::new(
                ota_config,
                identity,
                transport,
                slot,
                DeviceRestart,
                sink,
                Instant::now(),
            ))
        },
    )
    .context("Failed to spawn OTA worker")?;

    let mut button = BootButton::new(peripherals.pins.gpio0)?;
    let mut last_wifi_check = Instant::now();

    info!("Entering main loop");
    loop {
        if let Some(event) = button.poll() {
            handle_button(event, &updater);
        }

        drain_events(&events);

        if last_wifi_check.elapsed() >= WIFI_CHECK_INTERVAL {
            last_wifi_check = Instant::now();
            wifi.ensure_connected();
        }

        esp_idf_hal::delay::FreeRtos::delay_ms(LOOP_DELAY_MS);
    }
}

fn handle_button(event: ButtonEvent, updater: &OtaHandle) {
    match event {
        ButtonEvent::Click => match updater.force_check() {
            Ok(()) => info!("Manual update check queued"),
            Err(ForceCheckError::Busy(state)) => {
                info!("Update already in progress ({}), ignoring button", state)
            }
            Err(e) => log::error!("Manual update check failed: {}", e),
        },
        ButtonEvent::LongPress => {
            let state = updater.state();
            info!(
                "Firmware v{}, updater {}, worker {}",
                version::FIRMWARE_VERSION,
                state,
                if updater.is_running() { "running" } else { "stopped" }
            );
        }
    }
}

fn drain_events(events: &Receiver<OtaEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            OtaEvent::StateChanged { from, to } => {
                log::debug!("Updater {} -> {}", from, to);
                if to == OtaState::Error {
                    log::warn!("Update cycle failed, staying on v{}", version::FIRMWARE_VERSION);
                }
            }
            OtaEvent::Progress { .. } => {}
            OtaEvent::StatusReported { status, delivered } => {
                if !delivered {
                    log::warn!("Status '{}' did not reach the backend", status);
                }
            }
            OtaEvent::RestartScheduled { delay } => {
                log::warn!("New firmware installed, restarting in {}s", delay.as_secs());
            }
        }
    }
}
