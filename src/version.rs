// Centralized version information

// Cargo package version from Cargo.toml; this is what the backend compares
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

// Version info string for logging
pub fn version_info() -> String {
    format!(
        "OrthoTrack OTA Agent v{} (ESP-IDF {})",
        FIRMWARE_VERSION,
        idf_version()
    )
}

fn idf_version() -> String {
    let version = unsafe { std::ffi::CStr::from_ptr(esp_idf_sys::esp_get_idf_version()) };
    version.to_string_lossy().into_owned()
}
