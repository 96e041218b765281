use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ota_core::checksum::sha256_hex;
use ota_core::{
    CheckOutcome, ChecksumVerifier, DeviceIdentity, FirmwareSlot, FlashError, ImageFetcher,
    InstallWriter, OtaConfig, UpdateChecker, UpdateManifest, Verification, WriteSession,
};

mod transport;

use transport::ReqwestTransport;

#[derive(Parser)]
#[command(name = "ota-manifest")]
#[command(about = "OrthoTrack firmware release and OTA bench tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the check-update response for a firmware image
    Manifest {
        firmware: PathBuf,

        #[arg(long)]
        version: String,

        /// Where devices download the image from
        #[arg(long)]
        url: String,

        #[arg(long)]
        delta: bool,
    },

    /// Ask the backend for an update the way a device does
    Check {
        #[arg(long)]
        endpoint: String,

        #[arg(long)]
        device_id: String,

        #[arg(long)]
        api_key: String,

        #[arg(long)]
        current_version: String,

        #[arg(long, default_value = "ESP32-WROOM-32")]
        hardware: String,
    },

    /// Download and verify an image the way a device does
    Fetch {
        #[arg(long)]
        url: String,

        #[arg(long)]
        api_key: String,

        #[arg(long)]
        size: u64,

        #[arg(long)]
        checksum: String,

        /// Keep the downloaded image
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[arg(long, default_value = "60")]
        timeout_secs: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Manifest {
            firmware,
            version,
            url,
            delta,
        } => manifest(&firmware, &version, &url, delta),
        Command::Check {
            endpoint,
            device_id,
            api_key,
            current_version,
            hardware,
        } => check(endpoint, hardware, DeviceIdentity::new(device_id, api_key, current_version)),
        Command::Fetch {
            url,
            api_key,
            size,
            checksum,
            out,
            timeout_secs,
        } => fetch(&url, &api_key, size, &checksum, out, Duration::from_secs(timeout_secs)),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "❌".red(), e);
        std::process::exit(1);
    }
}

fn manifest(firmware: &Path, version: &str, url: &str, delta: bool) -> Result<()> {
    let image = fs::read(firmware)
        .with_context(|| format!("Failed to read firmware {}", firmware.display()))?;
    let checksum = sha256_hex(&image);

    // Same validation the device applies to the response
    let manifest = UpdateManifest::new(version, url, image.len() as u64, checksum, delta)?;

    let body = serde_json::json!({
        "update_available": true,
        "version": manifest.version(),
        "url": manifest.url(),
        "size": manifest.size(),
        "checksum": manifest.checksum(),
        "is_delta": manifest.is_delta(),
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn check(endpoint: String, hardware: String, identity: DeviceIdentity) -> Result<()> {
    let config = OtaConfig {
        api_endpoint: endpoint,
        hardware,
        ..OtaConfig::default()
    };
    config.validate()?;

    println!("{} Checking {} for {}", "🔎".blue(), config.api_endpoint, identity.device_id);
    let mut transport = ReqwestTransport::new(config.download_timeout())?;
    match UpdateChecker::new(&config, identity).check(&mut transport)? {
        CheckOutcome::NoUpdate => println!("{} Firmware is up to date", "✅".green()),
        CheckOutcome::UpdateAvailable(manifest) => {
            println!("{} Update available", "✨".green());
            println!("   version:  {}", manifest.version());
            println!("   url:      {}", manifest.url());
            println!("   size:     {} bytes", manifest.size());
            println!("   checksum: {}", manifest.checksum());
            println!("   delta:    {}", manifest.is_delta());
        }
    }
    Ok(())
}

fn fetch(
    url: &str,
    api_key: &str,
    size: u64,
    checksum: &str,
    out: Option<PathBuf>,
    timeout: Duration,
) -> Result<()> {
    let manifest = UpdateManifest::new("bench", url, size, checksum, false)?;
    let mut transport = ReqwestTransport::new(timeout)?;
    let mut slot = FileSlot { path: out.clone() };

    let mut image = ImageFetcher::open(&mut transport, &manifest, api_key)?;
    let expected = image.content_length;
    let session = slot.begin(expected)?;

    let pb = ProgressBar::new(expected as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes}")?
            .progress_chars("#>-"),
    );

    let mut writer = InstallWriter::new(session, expected, 16 * 1024);
    let mut verifier = ChecksumVerifier::new(manifest.checksum(), false);
    let pumped = writer.pump(image.body.as_mut(), |chunk, written| {
        verifier.update(chunk);
        pb.set_position(written as u64);
    });
    pb.finish_and_clear();
    pumped?;

    match verifier.finish() {
        Ok(Verification::Verified) => println!("{} SHA-256 verified", "✅".green()),
        Ok(Verification::Unverified { reason }) => {
            println!("{} Not verified: {}", "⚠️".yellow(), reason)
        }
        Err(e) => {
            writer.abort();
            bail!("Checksum error: {}", e);
        }
    }
    writer.finalize()?;

    match out {
        Some(path) => println!("{} Saved {} bytes to {}", "✨".green(), expected, path.display()),
        None => println!("{} Downloaded {} bytes", "✨".green(), expected),
    }
    Ok(())
}

/// Writes the image to a file, or discards it when no path is given.
struct FileSlot {
    path: Option<PathBuf>,
}

impl FirmwareSlot for FileSlot {
    fn begin(&mut self, _image_size: usize) -> Result<Box<dyn WriteSession + '_>, FlashError> {
        let sink: Box<dyn Write> = match &self.path {
            Some(path) => Box::new(BufWriter::new(
                File::create(path).map_err(|e| FlashError::Begin(e.to_string()))?,
            )),
            None => Box::new(io::sink()),
        };
        Ok(Box::new(FileSession {
            sink,
            path: self.path.clone(),
        }))
    }
}

struct FileSession {
    sink: Box<dyn Write>,
    path: Option<PathBuf>,
}

impl WriteSession for FileSession {
    fn write(&mut self, chunk: &[u8]) -> Result<usize, FlashError> {
        self.sink
            .write_all(chunk)
            .map_err(|e| FlashError::Write(e.to_string()))?;
        Ok(chunk.len())
    }

    fn finalize(mut self: Box<Self>) -> Result<(), FlashError> {
        self.sink
            .flush()
            .map_err(|e| FlashError::Finalize(e.to_string()))
    }

    fn abort(self: Box<Self>) {
        let FileSession { sink, path } = *self;
        drop(sink);
        if let Some(path) = path {
            let _ = fs::remove_file(path);
        }
    }
}
