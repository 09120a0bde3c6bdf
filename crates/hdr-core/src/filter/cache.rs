use tracing::debug;

use crate::pixel_buf::PixelBuffer;

/// Holds the reference output for the most recent input so repeated
/// verification against the same input does not recompute it.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    entry: Option<(blake3::Hash, PixelBuffer)>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &blake3::Hash) -> Option<&PixelBuffer> {
        match &self.entry {
            Some((k, buf)) if k == key => Some(buf),
            _ => None,
        }
    }

    pub fn store(&mut self, key: blake3::Hash, output: PixelBuffer) {
        debug!(key = %key.to_hex(), "caching reference output");
        self.entry = Some((key, output));
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }
}
