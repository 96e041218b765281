// OTA (Over-The-Air) update support for the ESP-IDF target

pub mod partition;

pub use partition::{confirm_running_image, EspFirmwareSlot};

// Update flow (driven by ota_core on the OTA worker):
// 1. Check the backend for a newer image
// 2. Stream it into the next OTA partition
// 3. Verify size and checksum, then set the boot partition
// 4. Restart after the grace delay
