use std::fmt;
use std::sync::Arc;

use tracing::info;

type Callback = dyn Fn(&str) + Send + Sync;

/// Receiver for human-readable progress lines ("Running reference...",
/// "Verification passed."). Every message is also logged at info level.
#[derive(Clone, Default)]
pub struct StatusSink {
    callback: Option<Arc<Callback>>,
}

impl StatusSink {
    pub fn new(callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// A sink that only logs.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn report(&self, message: &str) {
        info!(target: "hdr::status", "{message}");
        if let Some(callback) = &self.callback {
            callback(message);
        }
    }
}

impl fmt::Debug for StatusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusSink")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
