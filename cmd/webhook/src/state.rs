use internallb_admission::PolicyConfig;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone)]
pub struct WebhookState {
    pub policy: Arc<PolicyConfig>,
    ready: Arc<AtomicBool>,
}

impl WebhookState {
    pub fn new(policy: PolicyConfig) -> Self {
        Self {
            policy: Arc::new(policy),
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Report not ready so that no new traffic is routed while draining.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::Relaxed);
    }
}
