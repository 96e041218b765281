/// Restart handling and boot diagnostics
use log::{info, warn};
use ota_core::SystemControl;
use std::time::Duration;

/// Restarts the chip once the grace delay has passed, from a short-lived
/// thread so the updater can settle and the main loop keeps running.
pub struct DeviceRestart;

impl SystemControl for DeviceRestart {
    fn schedule_restart(&mut self, delay: Duration) {
        info!("Restart scheduled in {} seconds", delay.as_secs());

        let spawned = std::thread::Builder::new()
            .name("restart".into())
            .stack_size(4096)
            .spawn(move || restart_after(delay));

        if let Err(e) = spawned {
            warn!("Failed to spawn restart task ({}), restarting inline", e);
            restart_after(delay);
        }
    }
}

fn restart_after(delay: Duration) {
    std::thread::sleep(delay);
    info!("Restarting now");

    // Ensure log is flushed before the UART goes away
    log::logger().flush();
    esp_idf_hal::delay::Ets::delay_us(1000);

    unsafe { esp_idf_sys::esp_restart() };
}

/// Get the last reset reason as a string
pub fn get_reset_reason() -> &'static str {
    let reason = unsafe { esp_idf_sys::esp_reset_reason() };

    match reason {
        esp_idf_sys::esp_reset_reason_t_ESP_RST_UNKNOWN => "Unknown",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_POWERON => "Power-on",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_EXT => "External pin",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SW => "Software reset",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_PANIC => "Panic",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_INT_WDT => "Interrupt watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_TASK_WDT => "Task watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_WDT => "Other watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_DEEPSLEEP => "Deep sleep",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_BROWNOUT => "Brownout",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SDIO => "SDIO",
        _ => "Unknown reason code",
    }
}
