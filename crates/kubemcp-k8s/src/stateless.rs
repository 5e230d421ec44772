use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared switch that disables client caching when set
///
/// Clones share the same flag. Turning it on does not evict clients that are
/// already cached; it only affects resolutions made afterwards.
#[derive(Clone, Debug, Default)]
pub struct StatelessMode {
    enabled: Arc<AtomicBool>,
}

impl StatelessMode {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_stateless(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_stateless(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}
