//! Shutdown coordination shared by the transport and the application.
//!
//! Two stages: once draining starts, no new connections are accepted and the
//! ticker stops; once the final flush has run, the engine is closed and the
//! process may exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ShutdownState {
    draining: Arc<AtomicBool>,
    flushed: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once new connections must be refused.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// True once pending batches and positions have been flushed.
    pub fn is_shutdown_complete(&self) -> bool {
        self.flushed.load(Ordering::Acquire)
    }

    pub fn initiate_shutdown(&self) {
        if !self.draining.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - draining before the final flush");
        }
    }

    pub fn complete_shutdown(&self) {
        if !self.flushed.swap(true, Ordering::AcqRel) {
            info!("✅ Pending updates flushed - ready for final cleanup");
        }
    }
}
