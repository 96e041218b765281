//! Differential update support.
//!
//! The agent cannot apply binary patches yet. A manifest flagged as delta
//! is asked of the configured [`PatchApplier`] first; the shipped
//! [`FullImageFallback`] always declines, which makes the state machine
//! report `delta_not_supported` and install the full image instead.

use crate::installer::WriteSession;
use crate::manifest::UpdateManifest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchSupport {
    /// The applier will turn the incoming patch into the target image.
    Native,
    FallbackToFull { reason: String },
}

pub trait PatchApplier {
    fn name(&self) -> &'static str;

    fn support(&self, manifest: &UpdateManifest) -> PatchSupport;

    /// Wraps the flash session so patch bytes are expanded before they hit
    /// the partition. Only called after `support` returned `Native`.
    fn wrap<'a>(&mut self, session: Box<dyn WriteSession + 'a>) -> Box<dyn WriteSession + 'a> {
        session
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FullImageFallback;

impl PatchApplier for FullImageFallback {
    fn name(&self) -> &'static str {
        "full-image-fallback"
    }

    fn support(&self, _manifest: &UpdateManifest) -> PatchSupport {
        PatchSupport::FallbackToFull {
            reason: "Falling back to full update".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_always_declines() {
        let manifest =
            UpdateManifest::new("1.1.0", "http://host/fw.bin", 10, "abcd", true).unwrap();
        assert_eq!(
            FullImageFallback.support(&manifest),
            PatchSupport::FallbackToFull {
                reason: "Falling back to full update".into()
            }
        );
    }
}
