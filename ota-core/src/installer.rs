//! Streaming flash writer.
//!
//! Bytes go straight from the download stream into the inactive partition
//! through a fixed-size buffer. Every write must be accepted in full; the
//! first short or failed write aborts the session and nothing else is
//! written afterwards.

use crate::error::{FlashError, UpdateError};
use crate::transport::ByteStream;

/// One in-progress write to the inactive partition.
///
/// Implementations must abort the session if it is dropped without
/// `finalize` so a half-written image is never marked bootable.
pub trait WriteSession {
    /// Returns the number of bytes the partition accepted.
    fn write(&mut self, chunk: &[u8]) -> Result<usize, FlashError>;

    /// Validates the image and marks it as the next boot target.
    fn finalize(self: Box<Self>) -> Result<(), FlashError>;

    fn abort(self: Box<Self>);
}

/// The platform's A/B update slot.
pub trait FirmwareSlot {
    fn begin(&mut self, image_size: usize) -> Result<Box<dyn WriteSession + '_>, FlashError>;
}

pub struct InstallWriter<'a> {
    session: Option<Box<dyn WriteSession + 'a>>,
    expected: usize,
    bytes_written: usize,
    buffer_size: usize,
}

impl<'a> InstallWriter<'a> {
    pub fn new(session: Box<dyn WriteSession + 'a>, expected: usize, buffer_size: usize) -> Self {
        Self {
            session: Some(session),
            expected,
            bytes_written: 0,
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_written == self.expected
    }

    /// Writes one chunk. The session is aborted on any failure.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), UpdateError> {
        let remaining = self.expected - self.bytes_written;
        if chunk.len() > remaining {
            self.abort();
            return Err(UpdateError::Install(format!(
                "Write error: chunk of {} bytes exceeds remaining {} bytes",
                chunk.len(),
                remaining
            )));
        }

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| UpdateError::Install("Write error: session already closed".into()))?;

        match session.write(chunk) {
            Ok(accepted) if accepted == chunk.len() => {
                self.bytes_written += accepted;
                Ok(())
            }
            Ok(accepted) => {
                log::error!(
                    "Flash accepted {} of {} bytes at offset {}",
                    accepted,
                    chunk.len(),
                    self.bytes_written
                );
                self.abort();
                Err(UpdateError::Install(format!(
                    "Write error: accepted {} of {} bytes",
                    accepted,
                    chunk.len()
                )))
            }
            Err(e) => {
                log::error!("Flash write failed at offset {}: {}", self.bytes_written, e);
                self.abort();
                Err(UpdateError::Install(format!("Write error: {e}")))
            }
        }
    }

    /// Copies the stream into flash until `expected` bytes are written.
    /// `on_chunk` sees each chunk and the running total after it was
    /// accepted.
    pub fn pump<S, F>(&mut self, stream: &mut S, mut on_chunk: F) -> Result<(), UpdateError>
    where
        S: ByteStream + ?Sized,
        F: FnMut(&[u8], usize),
    {
        let mut buffer = vec![0u8; self.buffer_size];

        while self.bytes_written < self.expected {
            let want = (self.expected - self.bytes_written).min(buffer.len());
            let read = match stream.read(&mut buffer[..want]) {
                Ok(read) => read.min(want),
                Err(e) => {
                    self.abort();
                    return Err(UpdateError::Download(format!(
                        "Stream error after {} of {} bytes: {}",
                        self.bytes_written, self.expected, e
                    )));
                }
            };

            if read == 0 {
                log::error!(
                    "Firmware stream ended after {} of {} bytes",
                    self.bytes_written,
                    self.expected
                );
                self.abort();
                return Err(UpdateError::Download(format!(
                    "Stream ended after {} of {} bytes",
                    self.bytes_written, self.expected
                )));
            }

            self.write_chunk(&buffer[..read])?;
            on_chunk(&buffer[..read], self.bytes_written);
        }

        Ok(())
    }

    /// Commits the image. Refused unless every expected byte was written.
    pub fn finalize(mut self) -> Result<(), UpdateError> {
        if !self.is_complete() {
            let written = self.bytes_written;
            self.abort();
            return Err(UpdateError::Install(format!(
                "Finalization error: only {} of {} bytes written",
                written, self.expected
            )));
        }

        let session = self
            .session
            .take()
            .ok_or_else(|| UpdateError::Install("Finalization error: session already closed".into()))?;

        session.finalize().map_err(|e| {
            log::error!("Failed to finalize firmware image: {}", e);
            UpdateError::Install(format!("Finalization error: {e}"))
        })
    }

    pub fn abort(&mut self) {
        if let Some(session) = self.session.take() {
            log::warn!(
                "Aborting flash write session at {} of {} bytes",
                self.bytes_written,
                self.expected
            );
            session.abort();
        }
    }
}

impl Drop for InstallWriter<'_> {
    fn drop(&mut self) {
        self.abort();
    }
}
