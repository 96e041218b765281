pub mod http;
pub mod wifi;

pub use http::EspHttpTransport;
pub use wifi::WifiManager;

/// Whether the station interface currently holds an IPv4 address.
///
/// Reads the netif directly so it can be called from any task without
/// sharing the Wi-Fi driver.
pub fn station_has_ip() -> bool {
    unsafe {
        let mut ip_info: esp_idf_sys::esp_netif_ip_info_t = std::mem::zeroed();
        let netif = esp_idf_sys::esp_netif_get_handle_from_ifkey(
            b"WIFI_STA_DEF\0".as_ptr() as *const ::core::ffi::c_char,
        );
        if netif.is_null() {
            return false;
        }
        esp_idf_sys::esp_netif_get_ip_info(netif, &mut ip_info) == esp_idf_sys::ESP_OK
            && ip_info.ip.addr != 0
    }
}
