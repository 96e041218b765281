use std::fs;
use std::path::Path;

const DEVICE_CONFIG: &str = "device_config.h";

// (define name, fallback when the header or the define is missing)
const DEFINES: &[(&str, &str)] = &[
    ("WIFI_SSID", ""),
    ("WIFI_PASSWORD", ""),
    ("API_ENDPOINT", "https://api.orthotrack.com"),
    ("DEVICE_ID", "ESP32-001"),
    ("API_KEY", ""),
];

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();

    // Add crash log helper for better panic diagnostics
    println!("cargo:rustc-link-arg=-Wl,--undefined=esp_backtrace_print_app_description");
    println!("cargo:rerun-if-changed={}", DEVICE_CONFIG);

    let contents = if Path::new(DEVICE_CONFIG).exists() {
        fs::read_to_string(DEVICE_CONFIG)?
    } else {
        println!("cargo:warning={} not found! Copy device_config.h.example to {} and add your credentials.", DEVICE_CONFIG, DEVICE_CONFIG);
        String::new()
    };

    for (name, fallback) in DEFINES {
        let value = find_define(&contents, name).unwrap_or(fallback);
        println!("cargo:rustc-env={}={}", name, value);
    }

    Ok(())
}

/// Value of `#define NAME "value"`, if present.
fn find_define<'a>(contents: &'a str, name: &str) -> Option<&'a str> {
    contents
        .lines()
        .map(str::trim)
        .find(|line| {
            let mut parts = line.split_whitespace();
            parts.next() == Some("#define") && parts.next() == Some(name)
        })
        .and_then(|line| line.split('"').nth(1))
}
