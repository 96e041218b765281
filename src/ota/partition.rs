// Firmware slot backed by the ESP-IDF OTA API

use anyhow::Result;
use core::ffi::c_void;
use esp_idf_svc::ota::{EspOta, SlotState};
use esp_idf_sys::{
    esp, esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_next_update_partition,
    esp_ota_handle_t, esp_ota_set_boot_partition, esp_ota_write, esp_partition_t,
    ESP_ERR_OTA_VALIDATE_FAILED,
};

use ota_core::{FirmwareSlot, FlashError, WriteSession};

/// The inactive app partition, opened fresh for every update.
pub struct EspFirmwareSlot;

impl EspFirmwareSlot {
    pub fn new() -> Result<Self, FlashError> {
        // Fail early on images flashed without an OTA partition table
        let partition = next_update_partition()?;
        let (label, size) = unsafe { (partition_label(partition), (*partition).size) };
        log::info!("OTA target partition: {} ({} KB)", label, size / 1024);
        Ok(Self)
    }
}

fn next_update_partition() -> Result<*const esp_partition_t, FlashError> {
    let partition = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
    if partition.is_null() {
        return Err(FlashError::NoUpdatePartition);
    }
    Ok(partition)
}

unsafe fn partition_label(partition: *const esp_partition_t) -> String {
    std::ffi::CStr::from_ptr((*partition).label.as_ptr())
        .to_string_lossy()
        .into_owned()
}

impl FirmwareSlot for EspFirmwareSlot {
    fn begin(&mut self, image_size: usize) -> Result<Box<dyn WriteSession + '_>, FlashError> {
        let partition = next_update_partition()?;
        let available = unsafe { (*partition).size } as usize;
        if image_size > available {
            return Err(FlashError::InsufficientSpace {
                required: image_size,
                available,
            });
        }

        let mut handle: esp_ota_handle_t = 0;
        // Sized begin erases only what the image needs
        esp!(unsafe { esp_ota_begin(partition, image_size as _, &mut handle as *mut _) })
            .map_err(|e| FlashError::Begin(format!("{:?}", e)))?;

        log::info!("OTA write session opened for {} bytes", image_size);
        Ok(Box::new(EspWriteSession {
            partition,
            handle: Some(handle),
        }))
    }
}

struct EspWriteSession {
    partition: *const esp_partition_t,
    handle: Option<esp_ota_handle_t>,
}

impl WriteSession for EspWriteSession {
    fn write(&mut self, chunk: &[u8]) -> Result<usize, FlashError> {
        let handle = self
            .handle
            .ok_or_else(|| FlashError::Write("session closed".into()))?;

        esp!(unsafe { esp_ota_write(handle, chunk.as_ptr() as *const c_void, chunk.len() as _) })
            .map_err(|e| FlashError::Write(format!("{:?}", e)))?;

        // esp_ota_write takes the whole buffer or fails
        Ok(chunk.len())
    }

    fn finalize(mut self: Box<Self>) -> Result<(), FlashError> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| FlashError::Finalize("session closed".into()))?;

        let result = unsafe { esp_ota_end(handle) };
        if result == ESP_ERR_OTA_VALIDATE_FAILED as i32 {
            return Err(FlashError::Finalize("image validation failed".into()));
        }
        esp!(result).map_err(|e| FlashError::Finalize(format!("{:?}", e)))?;

        esp!(unsafe { esp_ota_set_boot_partition(self.partition) })
            .map_err(|e| FlashError::Finalize(format!("set boot partition: {:?}", e)))?;

        log::info!("New firmware image set as boot partition");
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        self.release();
    }
}

impl EspWriteSession {
    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = esp!(unsafe { esp_ota_abort(handle) }) {
                log::warn!("esp_ota_abort failed: {:?}", e);
            }
        }
    }
}

impl Drop for EspWriteSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Logs the running partition and marks it valid so the bootloader does
/// not roll back an image that booted far enough to get here.
pub fn confirm_running_image() -> Result<()> {
    let mut ota = EspOta::new()?;
    let slot = ota.get_running_slot()?;
    log::info!("Running from partition '{}' ({:?})", slot.label, slot.state);

    if slot.state != SlotState::Valid {
        ota.mark_running_slot_valid()?;
        log::info!("Running firmware marked valid");
    }
    Ok(())
}
